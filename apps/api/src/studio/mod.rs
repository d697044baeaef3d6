// Resume Studio: block decomposition, batched enhancement, review and reassembly.
// All backend calls go through backend_client; no module here talks HTTP directly.

pub mod decomposer;
pub mod dispatcher;
pub mod handlers;
pub mod prompts;
pub mod reassembler;
pub mod review;
pub mod scoring;
pub mod session;
