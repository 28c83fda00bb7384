use std::collections::HashMap;
use std::sync::Arc;

use crate::device::{DeviceEntry, DeviceId};
use crate::error::{AudioError, ErrorKind, Result};
use crate::format::{Capabilities, Direction, Mix};
use crate::system::System;

/// Why an id failed to resolve against a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Miss {
    /// Issued by another enumeration of the same service
    Stale,
    Unknown,
}

/// Devices captured by one enumeration, shared between the [`DeviceList`] and
/// the service that produced it
#[derive(Debug)]
pub(crate) struct Snapshot {
    pub(crate) owner: u64,
    pub(crate) generation: u64,
    pub(crate) entries: Vec<DeviceEntry>,
    index: HashMap<Arc<str>, usize>,
}

impl Snapshot {
    pub(crate) fn new(owner: u64, generation: u64, entries: Vec<DeviceEntry>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (Arc::clone(&entry.id.native), i))
            .collect();

        Self {
            owner,
            generation,
            entries,
            index,
        }
    }

    pub(crate) fn resolve(&self, id: &DeviceId) -> std::result::Result<&DeviceEntry, Miss> {
        if id.owner != self.owner {
            return Err(Miss::Unknown);
        }
        if id.generation != self.generation {
            return Err(Miss::Stale);
        }
        self.index
            .get(&id.native)
            .and_then(|&i| self.entries.get(i))
            .ok_or(Miss::Unknown)
    }
}

/// Immutable snapshot of the devices of one service.
///
/// Indices are stable for the lifetime of the list. Ids it hands out are only
/// valid against this list; using them against another snapshot fails with
/// `StaleDeviceId` instead of resolving to a different device.
#[derive(Debug)]
pub struct DeviceList {
    system: System,
    snapshot: Arc<Snapshot>,
}

impl DeviceList {
    pub(crate) fn new(system: System, snapshot: Arc<Snapshot>) -> Self {
        Self { system, snapshot }
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn count(&self) -> usize {
        self.snapshot.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.entries.is_empty()
    }

    pub fn id(&self, index: usize) -> Result<DeviceId> {
        self.snapshot
            .entries
            .get(index)
            .map(|entry| entry.id.clone())
            .ok_or_else(|| {
                AudioError::new(
                    ErrorKind::IndexOutOfRange,
                    format!("index {index} out of range for {} devices", self.count()),
                )
                .with_system(&self.system)
            })
    }

    pub fn entry(&self, id: &DeviceId) -> Result<&DeviceEntry> {
        self.snapshot.resolve(id).map_err(|miss| {
            let err = match miss {
                Miss::Stale => AudioError::new(
                    ErrorKind::StaleDeviceId,
                    format!(
                        "device id {id} is from enumeration {}, this list is {}",
                        id.generation, self.snapshot.generation
                    ),
                ),
                Miss::Unknown => {
                    AudioError::new(ErrorKind::UnknownId, format!("unknown device id {id}"))
                }
            };
            err.with_system(&self.system)
        })
    }

    pub fn name(&self, id: &DeviceId) -> Result<&str> {
        self.entry(id).map(|entry| entry.name.as_str())
    }

    pub fn capabilities(&self, id: &DeviceId) -> Result<&Capabilities> {
        self.entry(id).map(|entry| &entry.capabilities)
    }

    /// The format the device prefers, `None` when the backend cannot tell
    pub fn mix(&self, id: &DeviceId) -> Result<Option<Mix>> {
        self.entry(id).map(|entry| entry.mix)
    }

    pub fn channel_name(&self, id: &DeviceId, direction: Direction, index: usize) -> Result<&str> {
        let entry = self.entry(id)?;
        entry.channel_name(direction, index).ok_or_else(|| {
            AudioError::new(
                ErrorKind::IndexOutOfRange,
                format!(
                    "{direction:?} channel {index} out of range for {} channels",
                    entry.channels(direction)
                ),
            )
            .with_system(&self.system)
        })
    }

    /// All entries, in native enumeration order
    pub fn entries(&self) -> &[DeviceEntry] {
        &self.snapshot.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeviceEntry> {
        self.snapshot.entries.iter()
    }

    /// The device flagged as default for `direction`, if listed
    pub fn default_device(&self, direction: Direction) -> Option<&DeviceEntry> {
        self.iter().find(|entry| entry.is_default(direction))
    }

    /// Releases the list; its ids must not be used afterwards
    pub fn release(self) {
        tracing::debug!(system = %self.system, generation = self.snapshot.generation, "Device list released");
    }
}

impl<'a> IntoIterator for &'a DeviceList {
    type Item = &'a DeviceEntry;
    type IntoIter = std::slice::Iter<'a, DeviceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Access, BufferSizeRange, ChannelRange};

    fn entry(owner: u64, generation: u64, id: &str, default_output: bool) -> DeviceEntry {
        DeviceEntry {
            id: DeviceId {
                owner,
                generation,
                native: Arc::from(id),
            },
            name: format!("Device {id}"),
            input_channels: 0,
            output_channels: 2,
            default_input: false,
            default_output,
            mix: None,
            input_names: Vec::new(),
            output_names: vec!["Left".into(), "Right".into()],
            capabilities: Capabilities {
                sample_rates: [48_000].into_iter().collect(),
                encodings: Default::default(),
                input_channels: ChannelRange::NONE,
                output_channels: ChannelRange::up_to(2),
                buffer_frames: BufferSizeRange::default(),
                access: Access::INTERLEAVED,
            },
        }
    }

    fn list(owner: u64, generation: u64) -> DeviceList {
        DeviceList::new(
            System::from("A"),
            Arc::new(Snapshot::new(
                owner,
                generation,
                vec![
                    entry(owner, generation, "d0", false),
                    entry(owner, generation, "d1", true),
                ],
            )),
        )
    }

    #[test]
    fn test_ids_resolve_in_order() {
        let list = list(1, 1);
        assert_eq!(list.count(), 2);
        let id = list.id(1).unwrap();
        assert_eq!(id.native(), "d1");
        assert_eq!(list.name(&id).unwrap(), "Device d1");
        assert!(list.capabilities(&id).unwrap().supports_rate(48_000));
    }

    #[test]
    fn test_out_of_range_index() {
        let err = list(1, 1).id(5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
    }

    #[test]
    fn test_foreign_and_stale_ids() {
        let old = list(1, 1);
        let new = list(1, 2);
        let other = list(2, 1);

        let stale = old.id(0).unwrap();
        assert_eq!(new.name(&stale).unwrap_err().kind(), ErrorKind::StaleDeviceId);
        assert_eq!(other.name(&stale).unwrap_err().kind(), ErrorKind::UnknownId);

        let missing = DeviceId {
            owner: 1,
            generation: 1,
            native: Arc::from("nope"),
        };
        assert_eq!(old.entry(&missing).unwrap_err().kind(), ErrorKind::UnknownId);
    }

    #[test]
    fn test_default_device() {
        let list = list(1, 1);
        let default = list.default_device(Direction::Output).unwrap();
        assert_eq!(default.id.native(), "d1");
        assert!(list.default_device(Direction::Input).is_none());
    }

    #[test]
    fn test_channel_names_by_index() {
        let list = list(1, 1);
        let id = list.id(0).unwrap();
        assert_eq!(list.channel_name(&id, Direction::Output, 1).unwrap(), "Right");
        let err = list.channel_name(&id, Direction::Output, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
        let err = list.channel_name(&id, Direction::Input, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
        assert_eq!(list.mix(&id).unwrap(), None);
    }
}
