//! Destination for script output (`print`, `println`, declaratives).
//!
//! The CLI writes to stdout; tests and embedders capture into a buffer.

use std::{
    io::{self, Write},
    sync::Arc,
};

use parking_lot::Mutex;

pub enum Output {
    Stdout,
    Buffer(Mutex<String>),
    Silent,
}

pub type SharedOutput = Arc<Output>;

impl Output {
    pub fn stdout() -> SharedOutput {
        Arc::new(Output::Stdout)
    }

    pub fn buffer() -> SharedOutput {
        Arc::new(Output::Buffer(Mutex::new(String::new())))
    }

    pub fn print(&self, text: &str) {
        match self {
            Output::Stdout => {
                let mut stdout = io::stdout().lock();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
            Output::Buffer(buffer) => buffer.lock().push_str(text),
            Output::Silent => {}
        }
    }

    pub fn println(&self, text: &str) {
        match self {
            Output::Stdout => println!("{text}"),
            Output::Buffer(buffer) => {
                let mut buffer = buffer.lock();
                buffer.push_str(text);
                buffer.push('\n');
            }
            Output::Silent => {}
        }
    }

    /// Everything captured so far; empty for stdout and silent handlers.
    pub fn captured(&self) -> String {
        match self {
            Output::Buffer(buffer) => buffer.lock().clone(),
            _ => String::new(),
        }
    }

    pub fn clear(&self) {
        if let Output::Buffer(buffer) = self {
            buffer.lock().clear();
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Output::Stdout
    }
}
