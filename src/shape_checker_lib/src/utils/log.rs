//! Structs and functions for generating log messages and collecting findings.

use crate::checkers::Finding;
use crate::prelude::*;
use std::{collections::BTreeMap, thread::JoinHandle};

/// A generic log message.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct LogMessage {
    /// The log message.
    pub text: String,
    /// The severity/type of the log message.
    pub level: LogLevel,
    /// The statement or jump the message refers to.
    pub location: Option<Tid>,
    /// The analysis where the message originated.
    pub source: Option<String>,
}

impl LogMessage {
    /// Create a new `Info`-level log message
    pub fn new_info(text: impl Into<String>) -> LogMessage {
        LogMessage {
            text: text.into(),
            level: LogLevel::Info,
            location: None,
            source: None,
        }
    }

    /// Create a new `Debug`-level log message
    pub fn new_debug(text: impl Into<String>) -> LogMessage {
        LogMessage {
            text: text.into(),
            level: LogLevel::Debug,
            location: None,
            source: None,
        }
    }

    /// Create a new `Error`-level log message
    pub fn new_error(text: impl Into<String>) -> LogMessage {
        LogMessage {
            text: text.into(),
            level: LogLevel::Error,
            location: None,
            source: None,
        }
    }

    /// Associate a specific location to the log message.
    pub fn location(mut self, location: Tid) -> LogMessage {
        self.location = Some(location);
        self
    }

    /// Set the name of the source analysis for the log message.
    pub fn source(mut self, source: impl Into<String>) -> LogMessage {
        self.source = Some(source.into());
        self
    }
}

/// The severity/type of a log message.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum LogLevel {
    /// Messages intended for debugging.
    Debug,
    /// Errors encountered during analysis.
    Error,
    /// Non-error messages intended for the user.
    Info,
}

impl std::fmt::Display for LogMessage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.level {
            LogLevel::Debug => write!(formatter, "DEBUG: ")?,
            LogLevel::Error => write!(formatter, "ERROR: ")?,
            LogLevel::Info => write!(formatter, "INFO: ")?,
        };
        match (&self.source, &self.location) {
            (Some(source), Some(location)) => write!(formatter, "{} @ {}: ", source, location)?,
            (Some(source), None) => write!(formatter, "{}: ", source)?,
            (None, Some(location)) => write!(formatter, "{}: ", location)?,
            (None, None) => (),
        };
        write!(formatter, "{}", self.text)
    }
}

/// The message types a logging thread can receive.
/// See the [`LogThread`] type for more information.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum LogThreadMsg {
    /// A normal log message.
    Log(LogMessage),
    /// A finding of the property checker.
    Finding(Finding),
    /// Stop collecting and return everything received so far.
    Terminate,
}

impl From<LogMessage> for LogThreadMsg {
    fn from(msg: LogMessage) -> Self {
        Self::Log(msg)
    }
}

impl From<Finding> for LogThreadMsg {
    fn from(finding: Finding) -> Self {
        Self::Finding(finding)
    }
}

/// Handle to a thread collecting log messages and findings of one analysis run.
///
/// The analysis sends messages through [`LogThread::get_msg_sender`].
/// [`LogThread::collect`] stops the thread and returns what it collected.
/// Dropping the handle stops the thread and discards the messages.
pub struct LogThread {
    msg_sender: crossbeam_channel::Sender<LogThreadMsg>,
    thread_handle: Option<JoinHandle<(Vec<LogMessage>, Vec<Finding>)>>,
}

impl Drop for LogThread {
    fn drop(&mut self) {
        let _ = self.msg_sender.send(LogThreadMsg::Terminate);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl LogThread {
    /// Spawn a collector thread running `collector_func`.
    ///
    /// The collector must return once the channel disconnects
    /// or a [`LogThreadMsg::Terminate`] message arrives.
    pub fn spawn<F>(collector_func: F) -> LogThread
    where
        F: FnOnce(crossbeam_channel::Receiver<LogThreadMsg>) -> (Vec<LogMessage>, Vec<Finding>)
            + Send
            + 'static,
    {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let thread_handle = std::thread::spawn(move || collector_func(receiver));
        LogThread {
            msg_sender: sender,
            thread_handle: Some(thread_handle),
        }
    }

    /// A sender to this collector thread.
    pub fn get_msg_sender(&self) -> crossbeam_channel::Sender<LogThreadMsg> {
        self.msg_sender.clone()
    }

    /// Stop the collector thread and return the collected logs and findings.
    pub fn collect(mut self) -> (Vec<LogMessage>, Vec<Finding>) {
        let _ = self.msg_sender.send(LogThreadMsg::Terminate);
        match self.thread_handle.take().map(|handle| handle.join()) {
            Some(Ok(collected)) => collected,
            Some(Err(_)) => (
                vec![LogMessage::new_error("The log collector thread panicked.")],
                Vec::new(),
            ),
            None => (Vec::new(), Vec::new()),
        }
    }

    /// The standard collector: receive until [`LogThreadMsg::Terminate`] and deduplicate.
    ///
    /// Log messages are deduplicated if two messages share the same location and text.
    /// Findings are deduplicated if they share kind, location and call stack.
    /// In such a case only the first finding received is kept,
    /// since the fixpoint computation usually reports the shortest witness first.
    /// Findings are returned ordered by function, location and kind.

    pub fn collect_and_deduplicate(
        receiver: crossbeam_channel::Receiver<LogThreadMsg>,
    ) -> (Vec<LogMessage>, Vec<Finding>) {
        let mut logs_with_address = BTreeMap::new();
        let mut general_logs = Vec::new();
        let mut collected_findings = BTreeMap::new();

        while let Ok(log_thread_msg) = receiver.recv() {
            match log_thread_msg {
                LogThreadMsg::Log(log_message) => {
                    if let Some(ref tid) = log_message.location {
                        logs_with_address
                            .insert((tid.clone(), log_message.text.clone()), log_message);
                    } else {
                        general_logs.push(log_message);
                    }
                }
                LogThreadMsg::Finding(finding) => {
                    collected_findings
                        .entry(finding.dedup_key())
                        .or_insert(finding);
                }
                LogThreadMsg::Terminate => break,
            }
        }
        let logs = logs_with_address
            .into_values()
            .chain(general_logs)
            .collect();
        let mut findings: Vec<Finding> = collected_findings.into_values().collect();
        findings.sort_by(|a, b| {
            (&a.function, &a.location, a.kind, &a.call_stack).cmp(&(
                &b.function,
                &b.location,
                b.kind,
                &b.call_stack,
            ))
        });
        (logs, findings)
    }
}
