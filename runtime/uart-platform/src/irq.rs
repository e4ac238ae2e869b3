//! IRQ Handling - Interrupt routing for UART instances
//!
//! Drivers do not hand raw function pointers to the interrupt layer. A
//! registration is a routing entry (line → instance); the platform ISR looks
//! the line up and delivers a completion event to the owning instance.

use alloc::vec::Vec;

use thiserror::Error;

use crate::{InstanceId, IrqLine};

/// Interrupt controller errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IrqError {
    #[error("IRQ {line} out of range")]
    InvalidLine { line: IrqLine },

    #[error("IRQ {line} already has a handler")]
    AlreadyRegistered { line: IrqLine },

    #[error("IRQ {line} has no handler")]
    NotRegistered { line: IrqLine },
}

pub type Result<T> = core::result::Result<T, IrqError>;

/// Interrupt controller layer
pub trait IrqController {
    /// Route `line` to `instance`
    fn register_handler(&mut self, line: IrqLine, instance: InstanceId) -> Result<()>;

    /// Remove the route for `line`
    fn unregister_handler(&mut self, line: IrqLine) -> Result<()>;

    /// Unmask `line`
    fn enable(&mut self, line: IrqLine) -> Result<()>;

    /// Mask `line`
    fn disable(&mut self, line: IrqLine) -> Result<()>;
}

/// Line → instance routing table
///
/// Controllers embed one of these to implement `register_handler` and
/// `unregister_handler` and to resolve lines in their ISR.
pub struct IrqRouter {
    /// Highest routable line (exclusive)
    max_line: IrqLine,

    /// Registered routes
    routes: Vec<(IrqLine, InstanceId)>,
}

impl IrqRouter {
    /// Create a router accepting lines `0..max_line`
    pub fn new(max_line: IrqLine) -> Self {
        Self {
            max_line,
            routes: Vec::new(),
        }
    }

    /// Add a route
    ///
    /// # Errors
    /// - `IrqError::InvalidLine` if `line >= max_line`
    /// - `IrqError::AlreadyRegistered` if the line is taken
    pub fn register(&mut self, line: IrqLine, instance: InstanceId) -> Result<()> {
        if line >= self.max_line {
            return Err(IrqError::InvalidLine { line });
        }

        if self.route(line).is_some() {
            return Err(IrqError::AlreadyRegistered { line });
        }

        self.routes.push((line, instance));
        log::debug!("IRQ {} routed to UART{}", line, instance);
        Ok(())
    }

    /// Remove a route
    pub fn unregister(&mut self, line: IrqLine) -> Result<()> {
        let pos = self
            .routes
            .iter()
            .position(|(l, _)| *l == line)
            .ok_or(IrqError::NotRegistered { line })?;
        self.routes.swap_remove(pos);
        Ok(())
    }

    /// Instance owning `line`, if any
    pub fn route(&self, line: IrqLine) -> Option<InstanceId> {
        self.routes
            .iter()
            .find(|(l, _)| *l == line)
            .map(|(_, instance)| *instance)
    }

    /// Is a handler registered for `line`?
    pub fn is_registered(&self, line: IrqLine) -> bool {
        self.route(line).is_some()
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
