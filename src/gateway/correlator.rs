//! Command/response correlation.
//!
//! Each device has at most one pending command and at most one data waiter.
//! A parsed frame resolves the pending command first; a variable frame that
//! no command claims goes to the data waiter, which is how the data telegram
//! following a gateway ACK reaches the reader that asked for it.
//!
//! A meter read owns the device from its data waiter's registration until the
//! waiter is cancelled. Commands from anyone else are refused for that whole
//! span, including the wait for data after the ACK.

use crate::error::MBusError;
use crate::mbus::frame::{MBusFrame, MBusFrameType};
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};

struct Slot {
    id: u64,
    tx: oneshot::Sender<MBusFrame>,
}

impl Slot {
    // the caller dropped its receiver, so the slot no longer blocks anyone
    fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Default)]
struct Slots {
    next_id: u64,
    pending: HashMap<String, Slot>,
    data_waiters: HashMap<String, Slot>,
}

impl Slots {
    fn live(map: &HashMap<String, Slot>, device_id: &str) -> Option<u64> {
        map.get(device_id)
            .filter(|slot| !slot.is_abandoned())
            .map(|slot| slot.id)
    }

    fn open(
        map: &mut HashMap<String, Slot>,
        id: u64,
        device_id: &str,
    ) -> Result<oneshot::Receiver<MBusFrame>, MBusError> {
        if Self::live(map, device_id).is_some() {
            return Err(MBusError::CommandInProgress(device_id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        map.insert(device_id.to_string(), Slot { id, tx });
        Ok(rx)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn close(map: &mut HashMap<String, Slot>, device_id: &str, id: u64) {
        if map.get(device_id).is_some_and(|slot| slot.id == id) {
            map.remove(device_id);
        }
    }
}

/// Who a dispatched frame was handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Command,
    DataWaiter,
    Unsolicited,
}

/// Token identifying one registration, used to cancel it without touching a
/// later registration for the same device.
pub type SlotId = u64;

#[derive(Default)]
pub struct Correlator {
    slots: Mutex<Slots>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the pending command slot for `device_id`. Fails with
    /// `CommandInProgress` while another caller is still waiting, either for
    /// a command response or for a meter's data.
    pub async fn begin_command(
        &self,
        device_id: &str,
    ) -> Result<(SlotId, oneshot::Receiver<MBusFrame>), MBusError> {
        self.open_command(device_id, None).await
    }

    /// Opens the pending command slot on behalf of the read that holds data
    /// waiter `read`.
    pub async fn begin_read_command(
        &self,
        device_id: &str,
        read: SlotId,
    ) -> Result<(SlotId, oneshot::Receiver<MBusFrame>), MBusError> {
        self.open_command(device_id, Some(read)).await
    }

    async fn open_command(
        &self,
        device_id: &str,
        read: Option<SlotId>,
    ) -> Result<(SlotId, oneshot::Receiver<MBusFrame>), MBusError> {
        let mut slots = self.slots.lock().await;
        if Slots::live(&slots.data_waiters, device_id).is_some_and(|owner| Some(owner) != read) {
            return Err(MBusError::CommandInProgress(device_id.to_string()));
        }
        let id = slots.next_id();
        let rx = Slots::open(&mut slots.pending, id, device_id)?;
        Ok((id, rx))
    }

    pub async fn cancel_command(&self, device_id: &str, id: SlotId) {
        let mut slots = self.slots.lock().await;
        Slots::close(&mut slots.pending, device_id, id);
    }

    /// Opens the data waiter slot for `device_id`, reserving the device for
    /// one meter read. Fails with `CommandInProgress` while a command or
    /// another read is outstanding.
    pub async fn begin_data_wait(
        &self,
        device_id: &str,
    ) -> Result<(SlotId, oneshot::Receiver<MBusFrame>), MBusError> {
        let mut slots = self.slots.lock().await;
        if Slots::live(&slots.pending, device_id).is_some() {
            return Err(MBusError::CommandInProgress(device_id.to_string()));
        }
        let id = slots.next_id();
        let rx = Slots::open(&mut slots.data_waiters, id, device_id)?;
        Ok((id, rx))
    }

    pub async fn cancel_data_wait(&self, device_id: &str, id: SlotId) {
        let mut slots = self.slots.lock().await;
        Slots::close(&mut slots.data_waiters, device_id, id);
    }

    /// Hands `frame` to the pending command of `device_id`, or to its data
    /// waiter if the frame is a variable frame no command claimed.
    pub async fn dispatch(&self, device_id: &str, frame: &MBusFrame) -> Delivery {
        let mut slots = self.slots.lock().await;

        if let Some(slot) = slots.pending.remove(device_id) {
            if slot.tx.send(frame.clone()).is_ok() {
                return Delivery::Command;
            }
        }

        if frame.frame_type == MBusFrameType::Variable {
            if let Some(slot) = slots.data_waiters.remove(device_id) {
                if slot.tx.send(frame.clone()).is_ok() {
                    return Delivery::DataWaiter;
                }
            }
        }

        Delivery::Unsolicited
    }

    /// Drops every slot of `device_id`; their receivers observe a closed
    /// channel.
    pub async fn forget(&self, device_id: &str) {
        let mut slots = self.slots.lock().await;
        slots.pending.remove(device_id);
        slots.data_waiters.remove(device_id);
    }

    pub async fn forget_all(&self) {
        let mut slots = self.slots.lock().await;
        slots.pending.clear();
        slots.data_waiters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_command_is_rejected() {
        let correlator = Correlator::new();
        let (_id, _rx) = correlator.begin_command("oriongsm-1").await.unwrap();
        assert!(matches!(
            correlator.begin_command("oriongsm-1").await,
            Err(MBusError::CommandInProgress(_))
        ));
        assert!(correlator.begin_command("oriongsm-2").await.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_slot_is_reclaimed() {
        let correlator = Correlator::new();
        let (_id, rx) = correlator.begin_command("oriongsm-1").await.unwrap();
        drop(rx);
        assert!(correlator.begin_command("oriongsm-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_response_resolves_command_before_waiter() {
        let correlator = Correlator::new();
        let (read, mut waiter) = correlator.begin_data_wait("dev").await.unwrap();
        let (_c, command) = correlator.begin_read_command("dev", read).await.unwrap();

        assert_eq!(
            correlator.dispatch("dev", &MBusFrame::ack()).await,
            Delivery::Command
        );
        assert!(command.await.unwrap().is_ack());
        assert!(waiter.try_recv().is_err());

        let data = MBusFrame::variable(0x08, 0x01, vec![0x72]).unwrap();
        assert_eq!(correlator.dispatch("dev", &data).await, Delivery::DataWaiter);
        assert_eq!(waiter.await.unwrap(), data);

        assert_eq!(correlator.dispatch("dev", &data).await, Delivery::Unsolicited);
    }

    #[tokio::test]
    async fn test_waiter_ignores_non_variable_frames() {
        let correlator = Correlator::new();
        let (_w, _waiter) = correlator.begin_data_wait("dev").await.unwrap();
        assert_eq!(
            correlator.dispatch("dev", &MBusFrame::ack()).await,
            Delivery::Unsolicited
        );
    }

    #[tokio::test]
    async fn test_cancel_only_removes_own_slot() {
        let correlator = Correlator::new();
        let (first, rx) = correlator.begin_command("dev").await.unwrap();
        drop(rx);
        let (_second, _rx) = correlator.begin_command("dev").await.unwrap();
        correlator.cancel_command("dev", first).await;
        assert!(matches!(
            correlator.begin_command("dev").await,
            Err(MBusError::CommandInProgress(_))
        ));
    }

    #[tokio::test]
    async fn test_read_keeps_device_reserved_after_ack() {
        let correlator = Correlator::new();
        let (read, waiter) = correlator.begin_data_wait("dev").await.unwrap();
        let (_c, command) = correlator.begin_read_command("dev", read).await.unwrap();
        correlator.dispatch("dev", &MBusFrame::ack()).await;
        assert!(command.await.unwrap().is_ack());

        // the command slot is free again but the read still owns the device
        assert!(matches!(
            correlator.begin_command("dev").await,
            Err(MBusError::CommandInProgress(_))
        ));
        assert!(matches!(
            correlator.begin_data_wait("dev").await,
            Err(MBusError::CommandInProgress(_))
        ));
        assert!(matches!(
            correlator.begin_read_command("dev", read + 100).await,
            Err(MBusError::CommandInProgress(_))
        ));

        let data = MBusFrame::variable(0x08, 0x01, vec![0x72]).unwrap();
        assert_eq!(correlator.dispatch("dev", &data).await, Delivery::DataWaiter);
        assert_eq!(waiter.await.unwrap(), data);

        correlator.cancel_data_wait("dev", read).await;
        assert!(correlator.begin_command("dev").await.is_ok());
    }

    #[tokio::test]
    async fn test_read_waits_for_pending_command() {
        let correlator = Correlator::new();
        let (_c, _command) = correlator.begin_command("dev").await.unwrap();
        assert!(matches!(
            correlator.begin_data_wait("dev").await,
            Err(MBusError::CommandInProgress(_))
        ));
    }

    #[tokio::test]
    async fn test_abandoned_read_releases_device() {
        let correlator = Correlator::new();
        let (_read, waiter) = correlator.begin_data_wait("dev").await.unwrap();
        drop(waiter);
        assert!(correlator.begin_command("dev").await.is_ok());
    }
}
