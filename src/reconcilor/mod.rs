pub mod diff;
pub mod engine;
pub mod executor;
pub mod fetcher;
pub mod lifecycle;
pub mod services;
pub mod state;
pub mod validator;

pub use engine::AccountReconcilor;
pub use executor::{ActionExecutor, GaiaActionExecutor, ReconcileAction};
pub use lifecycle::{LifecycleController, ReconcilorEvent};
pub use services::{AuthError, SessionTransport, TokenService, TokenServiceEvent, TransportError};
