//! Shared protocol types for the exec demo.

use braid::{Tx, payload};

payload! {
    /// Top-level request envelope; exactly one variant field is set.
    pub struct Request {
        pub exec: Option<ExecRequest>,
        pub search: Option<SearchRequest>,
    }
}

payload! {
    /// Run a command and stream its output back on `reply`.
    pub struct ExecRequest {
        pub command: String,
        pub args: Vec<String>,
        pub reply: Tx<ExecReply>,
    }
}

payload! {
    pub struct ExecReply {
        pub stdout: Vec<u8>,
        pub stderr: Vec<u8>,
        pub done: bool,
    }
}

payload! {
    pub struct SearchRequest {
        pub query: String,
    }
}
