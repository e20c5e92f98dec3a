//! Shared protocol constants for the Ferry EOT-framed transport

// End-of-transmission sentinel terminating every response
pub const EOT: u8 = 0x04;

// Largest single write of a response payload. Carries no meaning to the
// receiver, it only bounds send sizes.
pub const MAX_CHUNK: usize = 4095;

// A command is expected to arrive in one read of at most this many bytes
pub const COMMAND_BUFFER: usize = 1024;

// Default bound on simultaneously tracked clients
pub const DEFAULT_MAX_CLIENTS: usize = 10;

// Receive buffer for Put uploads
pub const UPLOAD_BUFFER: usize = 64 * 1024;

// Timestamp layout used by Files, Get and Put responses
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Command verbs (case-sensitive on the wire)
pub mod verb {
    pub const LIST: &str = "List";
    pub const FILES: &str = "Files";
    pub const GET: &str = "Get";
    pub const PUT: &str = "Put";
    pub const QUIT: &str = "Quit";
}

// Fixed response texts
pub mod reply {
    pub const INVALID_COMMAND: &str =
        "Invalid command. Valid commands: List, Files, Get <filename>, Put <filename>, Quit\n";
    pub const LIST_HEADER: &str = "Connected Clients:\n";
    pub const FILES_HEADER: &str = "List of Files:\n";
    pub const OK_PREFIX: &str = "OK ";

    pub fn usage(verb: &str) -> String {
        format!("Invalid command. Usage: {} <filename>\n", verb)
    }

    pub fn total_clients(n: usize) -> String {
        format!("Total Clients: {}\n", n)
    }

    pub fn total_files(n: usize) -> String {
        format!("Total Files: {}\n", n)
    }

    pub fn file_not_found(name: &str) -> String {
        format!("File not found: {}\n", name)
    }

    pub fn invalid_filename(name: &str) -> String {
        format!("Error: invalid filename {}\n", name)
    }

    pub fn server_full(max_clients: usize) -> String {
        format!("Server full: maximum {} clients connected\n", max_clients)
    }
}

// Centralized timeout constants
pub mod timeouts {
    // Idle window after which a Put upload is considered complete (ms)
    pub const UPLOAD_IDLE_MS: u64 = 1000;

    // Connection establishment timeout for the client (ms)
    pub const CONNECT_MS: u64 = 5000;
}
