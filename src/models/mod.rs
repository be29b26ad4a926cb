pub mod activity;
pub mod course;
pub mod dashboard;
pub mod learner;
pub mod learner_state;
pub mod recommendation;
pub mod settings;
pub mod transaction;

pub use activity::*;
pub use course::*;
pub use dashboard::*;
pub use learner::*;
pub use learner_state::*;
pub use recommendation::*;
pub use settings::*;
pub use transaction::*;
