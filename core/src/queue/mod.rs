pub mod handoff;

pub use handoff::HandoffQueue;
