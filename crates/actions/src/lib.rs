//! Action definitions: declared input schemas, middleware, routes, and the
//! process-wide registry.

mod action;
mod middleware;
mod params;
mod registry;
mod schema;

pub use {
    action::{Action, ActionDef, FnAction, McpOptions, TaskSchedule, WebRoute},
    middleware::{ActionMiddleware, MiddlewareRegistry},
    params::{RawParams, RawValue},
    registry::{ActionRegistry, NAMESPACE},
    schema::{Field, FieldKind, InputSchema, Params, SECRET_PLACEHOLDER},
};
