pub mod config;
pub mod error;
pub mod models;
pub mod pair;
pub mod plan;
pub mod resolver;
pub mod store;

pub use config::{MissingTimestampPolicy, ResolverConfig, SweepConfig, TieBreak};
pub use error::SweepError;
pub use models::ChatRecord;
pub use pair::ParticipantPairKey;
pub use plan::{build_plan, DedupPlan, DuplicateGroup};
pub use resolver::{DeleteFailure, Resolver, SweepPhase, SweepReport};
pub use store::{create_store, ChatStore, StoreError};
