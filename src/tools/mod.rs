pub mod executor;
pub mod registry;
pub mod schema;
pub mod search;
pub mod travel;

pub use executor::ActionExecutor;
pub use registry::{
    parse_args, to_json_text, ActionError, ActionHandler, ActionRegistry, CallerContext,
    UserContextProvider,
};
pub use schema::{parameters_schema, ActionSpec};
pub use search::WebSearch;
