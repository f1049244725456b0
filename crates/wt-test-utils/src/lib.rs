// wt-test-utils: Shared test utilities for the webhook tester suite.
//
// Provides an event-stream client for integration tests of the live
// stream endpoint.

pub mod sse_client;

pub use sse_client::{drain_frames, SseClient};
