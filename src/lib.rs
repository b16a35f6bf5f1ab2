//! # RecipeFlow: an automation recipe engine
//!
//! `recipeflow` executes automation recipes: a recipe pairs one trigger
//! (email, calendar, schedule, file, webhook, custom) with an ordered tree of
//! actions, plus the policies that govern a run. The engine provides:
//!
//! - **Trigger dispatch**: enabled/type/filter/condition matching of incoming
//!   events against the recipe set, with per-trigger throttling (rate limit,
//!   debounce, once-per-period) and per-recipe hourly caps.
//! - **Admission control**: a bounded queue drained in priority order with a
//!   global concurrency cap and per-recipe caps.
//! - **Action interpretation**: sequential execution with condition gates,
//!   conditional branches, for-each/while/repeat loops, and stop/pause/resume
//!   flow actions; side effects live in host-registered [`ActionHandler`]s.
//! - **Retry & error handling**: per-action ignore/stop/retry/fallback
//!   strategies with capped exponential backoff.
//! - **Variable scopes**: step, execution, recipe, and global tiers with
//!   template interpolation, lazy computed variables, and encrypted values
//!   decrypted only at substitution.
//! - **Execution store**: per-execution records and per-recipe rolling stats.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use recipeflow::{Engine, Recipe, TriggerEvent, TriggerType};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = Engine::builder()
//!         .register_handler("email", my_email_handler())
//!         .build();
//!
//!     let recipe: Recipe = serde_json::from_str(recipe_json()).unwrap();
//!     engine.add_recipe(recipe).unwrap();
//!
//!     let event = TriggerEvent::new(
//!         TriggerType::Email,
//!         json!({"from": "newsletter@example.com", "subject": "Weekly digest"}),
//!     );
//!     for result in engine.handle_event(&event) {
//!         let mut handle = result.unwrap();
//!         println!("{:?}", handle.wait().await);
//!     }
//! }
//! # fn my_email_handler() -> std::sync::Arc<dyn recipeflow::ActionHandler> { unimplemented!() }
//! # fn recipe_json() -> &'static str { unimplemented!() }
//! ```

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod execution;
pub mod handler;
pub mod interpreter;
pub mod retry;
pub mod schema;
pub mod scheduler;
pub mod store;
pub mod template;
pub mod throttle;
pub mod validation;

pub use config::EngineConfig;
pub use context::{GlobalScope, NoDecrypt, SecretCipher, VariableContext, VariableScope};
pub use dispatcher::{DenyReason, DispatchDecision, TriggerDispatcher};
pub use engine::{Engine, EngineBuilder};
pub use error::{ActionError, ActionResult, EngineError, EngineResult};
pub use events::{EngineEvent, EventReceiver};
pub use execution::{
    ActionExecution, Execution, ExecutionContext, ExecutionRequest, ExecutionStatus, RetryAttempt,
    TriggerEvent,
};
pub use handler::{ActionHandler, ActionHandlerRegistry};
pub use interpreter::ExecutionSignals;
pub use schema::{
    Action, ActionConfig, AutomationStats, Condition, ConditionLogic, ConditionOperator,
    ErrorHandling, ErrorStrategy, LoopKind, Recipe, RecipePriority, RecipeSettings, RetryPolicy,
    ThrottlePeriod, Throttling, Trigger, TriggerConfig, TriggerType,
};
pub use scheduler::{ExecutionHandle, ExecutionScheduler};
pub use store::ExecutionStore;
pub use template::TemplateEngine;
pub use throttle::ThrottleGuard;
pub use validation::validate_recipe;
