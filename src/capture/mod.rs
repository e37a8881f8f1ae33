pub mod context;
pub mod frame;
pub mod session;
pub mod slot;

pub use context::{Context, StreamId};
pub use frame::{Frame, FrameMetadata};
pub use session::{SessionTimeouts, StreamSession};
pub use slot::{frame_slot, FramePublisher, FrameStore, StreamStats};
