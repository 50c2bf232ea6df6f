use std::borrow::Cow;
use std::fmt::Display;

/// A misuse of the function builder, found while emitting or finishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildError {
    pub id: &'static str,
    /// The basic block the error was found in, if any.
    pub block: Option<usize>,
    pub message: Option<Cow<'static, str>>,
}

impl BuildError {
    pub fn new(id: &'static str) -> BuildError {
        BuildError {
            id,
            block: None,
            message: None,
        }
    }

    pub fn in_block(mut self, block: usize) -> Self {
        self.block = Some(block);
        self
    }

    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)?;
        if let Some(bb) = self.block {
            write!(f, " (in block {})", bb)?;
        }
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildError {}
