//! Core functionalities: UART transport, reading history.

pub mod uart_service;
pub mod readings;

pub use uart_service::{PortInfo, RxBuffer, UartConfig, UartError, UartEvent, UartService};
pub use readings::{Reading, ReadingLog};
