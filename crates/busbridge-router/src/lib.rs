//! # busbridge-router
//!
//! The bridge engine: routes signals from the local bus to broker topics and
//! broker commands back to bus method calls.
//!
//! | module | role |
//! |---|---|
//! | [`path`] | dotted path expressions over signal payloads |
//! | [`mapping`] | routing entries and the shared mapping table |
//! | [`discovery`] | lists live entities on the bus |
//! | [`reconciler`] | keeps the table in step with live entities |
//! | [`debounce`] | quiet-window filter for repeated signals |
//! | [`pipeline`] | feed listener and extraction workers |
//! | [`publisher`] | bounded-retry delivery to the broker |
//! | [`dispatcher`] | broker commands to bus method calls |
//! | [`context`] | shared state and settings |
//! | [`bridge`] | task lifecycle |
//! | [`telemetry`] | subscriber setup |

pub mod bridge;
pub mod context;
pub mod debounce;
pub mod discovery;
pub mod dispatcher;
pub mod mapping;
pub mod path;
pub mod pipeline;
pub mod publisher;
pub mod reconciler;
pub mod telemetry;

pub use bridge::Bridge;
pub use context::{BridgeContext, BridgeSettings};
pub use dispatcher::{CommandDispatcher, DispatchReport, PlayerCommand};
pub use mapping::{EntryOrigin, MappingTable, RoutingEntry, SharedMappingTable};
pub use path::{PathExpression, Segment};
pub use pipeline::{ExtractionPipeline, PipelineOutcome};
pub use reconciler::{EntryTemplate, ReconcileReport, Reconciler};
