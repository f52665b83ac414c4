pub mod block;
pub mod error;
pub mod graph;
pub mod id;
pub mod naming;
pub mod port;
pub mod signature;
pub mod type_id;

// Re-export commonly used types
pub use block::{Attachment, Block, BlockKind, Category, ImportedFunction};
pub use error::CoreError;
pub use graph::{Connection, ConnectionInfo, FlowGraph, GraphEvent};
pub use id::{BlockId, ConnectionId, PortRef};
pub use naming::{sanitize_caption, UniquenessIndex};
pub use port::{DataPort, Direction, FunctionPort, InputPort, OutputPort, PortKind, PortValue};
pub use signature::{Signature, TypeSeq};
pub use type_id::{BindOutcome, IdentityRegistry, TypeId, NONE_TAG};
