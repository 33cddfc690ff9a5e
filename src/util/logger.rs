//! Structured logging helpers on top of `log`: a scoped prefix stack so
//! nested pipeline stages tag their lines, and a per-thread line buffer so
//! each worker task's output is flushed contiguously instead of interleaved.

use std::cell::RefCell;
use std::sync::Mutex;

use log::Level;

thread_local! {
    static PREFIX_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static LINE_BUFFER: RefCell<Option<Vec<(Level, String)>>> = const { RefCell::new(None) };
}

/// Serializes buffer flushes so one task's lines stay together.
static FLUSH_ORDER: Mutex<()> = Mutex::new(());

/// Pushes a prefix for the lifetime of the guard.
pub struct Prefix;

pub struct PrefixGuard;

impl Prefix {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> PrefixGuard {
        let prefix = prefix.into();
        PREFIX_STACK.with(|stack| stack.borrow_mut().push(prefix));
        PrefixGuard
    }
}

impl Drop for PrefixGuard {
    fn drop(&mut self) {
        PREFIX_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

fn prefixed(message: &str) -> String {
    PREFIX_STACK.with(|stack| {
        let stack = stack.borrow();
        if stack.is_empty() {
            return message.to_string();
        }
        let mut out = String::new();
        for prefix in stack.iter() {
            out.push('[');
            out.push_str(prefix);
            out.push_str("] ");
        }
        out.push_str(message);
        out
    })
}

fn emit(level: Level, message: String) {
    let line = prefixed(&message);
    let buffered = LINE_BUFFER.with(|buffer| {
        if let Some(lines) = buffer.borrow_mut().as_mut() {
            lines.push((level, line.clone()));
            true
        } else {
            false
        }
    });

    if !buffered {
        log::log!(level, "{line}");
    }
}

/// Starts buffering this thread's log lines; used by worker tasks.
pub fn start_thread_buffer() {
    LINE_BUFFER.with(|buffer| {
        *buffer.borrow_mut() = Some(Vec::new());
    });
}

/// Flushes the thread's buffered lines in order under a global lock.
pub fn flush_thread_buffer() {
    let lines = LINE_BUFFER.with(|buffer| buffer.borrow_mut().take());
    let Some(lines) = lines else {
        return;
    };
    if lines.is_empty() {
        return;
    }

    let _order = FLUSH_ORDER.lock().unwrap_or_else(|e| e.into_inner());
    for (level, line) in lines {
        log::log!(level, "{line}");
    }
}

pub fn trace(message: impl Into<String>) {
    emit(Level::Trace, message.into());
}

pub fn debug(message: impl Into<String>) {
    emit(Level::Debug, message.into());
}

pub fn info(message: impl Into<String>) {
    emit(Level::Info, message.into());
}

pub fn warn(message: impl Into<String>) {
    emit(Level::Warn, message.into());
}

pub fn error(message: impl Into<String>) {
    emit(Level::Error, message.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_guard_pops_on_drop() {
        assert_eq!(prefixed("msg"), "msg");
        {
            let _a = Prefix::new("meshes\\a.nif");
            {
                let _b = Prefix::new("shape 0");
                assert_eq!(prefixed("msg"), "[meshes\\a.nif] [shape 0] msg");
            }
            assert_eq!(prefixed("msg"), "[meshes\\a.nif] msg");
        }
        assert_eq!(prefixed("msg"), "msg");
    }

    #[test]
    fn buffering_holds_lines_until_flush() {
        start_thread_buffer();
        trace("line one");
        debug("line two");
        let count = LINE_BUFFER.with(|b| b.borrow().as_ref().map(Vec::len));
        assert_eq!(count, Some(2));
        flush_thread_buffer();
        let active = LINE_BUFFER.with(|b| b.borrow().is_some());
        assert!(!active);
    }
}
