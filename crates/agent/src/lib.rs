//! The agent loop of Toolwright.
//!
//! One turn follows a **Reason → Act → Observe** cycle:
//!
//! 1. **Load** the thread and inject the system prompt once
//! 2. **Stream** the model response, forwarding text as `Delta` events
//! 3. **If tool calls**: dispatch them, append observations, loop back to 2
//! 4. **Otherwise**: fall back to re-derived text if nothing was streamed
//! 5. **Checkpoint** the thread and close the stream with `End`
//!
//! The recursion limit bounds step 3; a turn that hits it still answers.

pub mod loop_runner;
pub mod prompt;
pub mod session;
pub mod stream_event;
pub mod testing;

pub use loop_runner::{AgentLoop, LIMIT_NOTICE};
pub use session::{EvictionPolicy, InMemorySessionStore, SessionStore, ThreadLock};
pub use stream_event::{ClientError, StreamEvent};
