//! Thread-safe UART wrapper
//!
//! Writes from different tasks serialize on the recursive mutex, which
//! keeps the port's total write order intact. Line-oriented reads hold
//! the lock for the whole line so interleaved readers cannot split one.

use portable_atomic::{AtomicBool, Ordering};

use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::types::{BaudRate, TimeoutMs};
use kinesis_hal::uart::{Uart, UartDiagnostics, UartError, UartResult, UartStatistics};

use crate::wrapper::{LockStatsSnapshot, SharedCore, TimeSource};
use crate::mutex::RawSharedMutex;

/// UART port behind a recursive mutex.
pub struct SharedUart<U: Uart, M: RawSharedMutex> {
    core: SharedCore<U, M>,
    initialized: AtomicBool,
}

impl<U: Uart, M: RawSharedMutex> SharedUart<U, M> {
    /// Take exclusive ownership of a driver.
    pub fn new(inner: U) -> Self {
        let initialized = inner.is_initialized();
        Self {
            core: SharedCore::new(inner),
            initialized: AtomicBool::new(initialized),
        }
    }

    /// Attach a microsecond source for lock-acquisition timing.
    pub fn with_time_source(mut self, time: TimeSource) -> Self {
        self.core = self.core.with_time_source(time);
        self
    }

    pub fn into_inner(self) -> U {
        self.core.into_inner()
    }

    pub fn set_mutex_timeout(&self, timeout: TimeoutMs) {
        self.core.set_mutex_timeout(timeout);
    }

    fn write_op<R>(&self, f: impl FnOnce(&mut U) -> UartResult<R>) -> UartResult<R> {
        match self.core.with_write(|inner| {
            let result = f(inner);
            self.initialized
                .store(inner.is_initialized(), Ordering::Relaxed);
            result
        }) {
            Some(result) => result,
            None => Err(UartError::Timeout),
        }
    }

    pub fn initialize(&self) -> UartResult<()> {
        self.write_op(|u| u.initialize())
    }

    pub fn deinitialize(&self) -> UartResult<()> {
        self.write_op(|u| u.deinitialize())
    }

    pub fn write(&self, data: &[u8], timeout: TimeoutMs) -> UartResult<()> {
        self.write_op(|u| u.write(data, timeout))
    }

    pub fn read(&self, buf: &mut [u8], timeout: TimeoutMs) -> UartResult<usize> {
        self.write_op(|u| u.read(buf, timeout))
    }

    pub fn read_line(&self, buf: &mut [u8], timeout: TimeoutMs) -> UartResult<usize> {
        self.write_op(|u| u.read_line(buf, timeout))
    }

    pub fn read_until(
        &self,
        buf: &mut [u8],
        terminator: u8,
        timeout: TimeoutMs,
    ) -> UartResult<usize> {
        self.write_op(|u| u.read_until(buf, terminator, timeout))
    }

    pub fn bytes_available(&self) -> UartResult<usize> {
        self.write_op(|u| u.bytes_available())
    }

    pub fn flush_tx(&self, timeout: TimeoutMs) -> UartResult<()> {
        self.write_op(|u| u.flush_tx(timeout))
    }

    pub fn flush_rx(&self) -> UartResult<()> {
        self.write_op(|u| u.flush_rx())
    }

    pub fn set_baud_rate(&self, baud_rate: BaudRate) -> UartResult<()> {
        self.write_op(|u| u.set_baud_rate(baud_rate))
    }

    pub fn statistics(&self) -> UartResult<UartStatistics> {
        self.core
            .with_read(|u| u.statistics())
            .ok_or(UartError::Timeout)
    }

    pub fn diagnostics(&self) -> UartResult<UartDiagnostics> {
        self.core
            .with_read(|u| u.diagnostics())
            .ok_or(UartError::Timeout)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    pub fn try_lock(&self) -> bool {
        self.core.try_lock()
    }

    pub fn lock(&self) {
        self.core.lock();
    }

    pub fn unlock(&self) {
        self.core.unlock();
    }

    /// Composite section under one acquisition.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut U) -> R) -> UartResult<R> {
        self.core.with_write(f).ok_or(UartError::Timeout)
    }

    pub fn lock_statistics(&self) -> LockStatsSnapshot {
        self.core.lock_statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::StdRecursiveMutex;

    use std::sync::Arc;
    use std::thread;

    use kinesis_hal::uart::UartConfig;
    use kinesis_hal_esp32c6::port::soft::SoftUart;
    use kinesis_hal_esp32c6::UartDriver;

    fn shared_port() -> SharedUart<UartDriver<SoftUart>, StdRecursiveMutex> {
        SharedUart::new(UartDriver::new(SoftUart::new(), UartConfig::default()))
    }

    #[test]
    fn test_writes_are_not_interleaved() {
        let uart = Arc::new(shared_port());
        let mut handles = Vec::new();
        for t in 0..3u8 {
            let uart = Arc::clone(&uart);
            handles.push(thread::spawn(move || {
                let chunk = [b'a' + t; 8];
                for _ in 0..10 {
                    uart.write(&chunk, 100).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        // Every 8-byte chunk is contiguous in the captured stream
        let captured = uart.with_lock(|u| u.port_mut().tx_capture.clone()).unwrap();
        assert_eq!(captured.len(), 240);
        for chunk in captured.chunks(8) {
            assert!(chunk.iter().all(|&b| b == chunk[0]));
        }
    }

    #[test]
    fn test_shared_read_line() {
        let uart = shared_port();
        uart.initialize().unwrap();
        uart.with_lock(|u| u.port_mut().feed_rx(b"line\r\n")).unwrap();
        let mut buf = [0u8; 16];
        let n = uart.read_line(&mut buf, 100).unwrap();
        assert_eq!(&buf[..n], b"line");
    }
}
