//! Transaction payloads.
//!
//! A [`Parcel`] is an ordered sequence of slots. Plain values are stored as
//! serde-encoded JSON values; capability handles occupy their own slots so
//! they travel by reference instead of being flattened into bytes.
//!
//! Reads are positional: a reader must consume slots in exactly the order the
//! writer produced them. Any mismatch surfaces as a transport failure, the
//! same way a corrupted reply would.

use serde::de::DeserializeOwned;
use serde::Serialize;
use svcmgr_common::{Error, Result};

use crate::binder::CapabilityHandle;

#[derive(Debug, Clone)]
enum Slot {
    Value(serde_json::Value),
    Handle(Option<CapabilityHandle>),
}

/// Request or reply payload for one transaction.
#[derive(Debug, Clone, Default)]
pub struct Parcel {
    slots: Vec<Slot>,
    cursor: usize,
}

impl Parcel {
    /// Creates an empty parcel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a serializable value.
    pub fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| Error::transport(format!("Failed to marshal parcel value: {}", e)))?;
        self.slots.push(Slot::Value(value));
        Ok(())
    }

    /// Reads the next value.
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T> {
        let position = self.cursor;
        match self.next_slot()? {
            Slot::Value(value) => serde_json::from_value(value.clone()).map_err(|e| {
                Error::transport(format!(
                    "Failed to unmarshal parcel slot {}: {}",
                    position, e
                ))
            }),
            Slot::Handle(_) => Err(Error::transport(format!(
                "Parcel slot {} holds a handle, expected a value",
                position
            ))),
        }
    }

    /// Appends a (possibly absent) capability handle.
    pub fn write_handle(&mut self, handle: Option<&CapabilityHandle>) {
        self.slots.push(Slot::Handle(handle.cloned()));
    }

    /// Reads the next handle slot.
    pub fn read_handle(&mut self) -> Result<Option<CapabilityHandle>> {
        let position = self.cursor;
        match self.next_slot()? {
            Slot::Handle(handle) => Ok(handle.clone()),
            Slot::Value(_) => Err(Error::transport(format!(
                "Parcel slot {} holds a value, expected a handle",
                position
            ))),
        }
    }

    /// Writes the interface token a stub checks before dispatching.
    pub fn write_interface_token(&mut self, descriptor: &str) -> Result<()> {
        self.write(descriptor)
    }

    /// Reads the interface token and checks it against `descriptor`.
    pub fn enforce_interface(&mut self, descriptor: &str) -> Result<()> {
        let token: String = self.read()?;
        if token != descriptor {
            return Err(Error::descriptor_mismatch(descriptor, token));
        }
        Ok(())
    }

    /// Number of slots written.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots left to read.
    pub fn remaining(&self) -> usize {
        self.slots.len().saturating_sub(self.cursor)
    }

    /// Moves the read cursor back to the first slot.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn next_slot(&mut self) -> Result<&Slot> {
        let slot = self.slots.get(self.cursor).ok_or_else(|| {
            Error::transport(format!(
                "Parcel underflow: read past slot {} of {}",
                self.cursor,
                self.slots.len()
            ))
        })?;
        self.cursor += 1;
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_read_in_write_order() {
        let mut parcel = Parcel::new();
        parcel.write("storage.default").unwrap();
        parcel.write(&true).unwrap();
        parcel.write(&vec![1u32, 2, 3]).unwrap();

        assert_eq!(parcel.len(), 3);
        assert_eq!(parcel.read::<String>().unwrap(), "storage.default");
        assert!(parcel.read::<bool>().unwrap());
        assert_eq!(parcel.read::<Vec<u32>>().unwrap(), vec![1, 2, 3]);
        assert_eq!(parcel.remaining(), 0);
    }

    #[test]
    fn test_underflow_is_transport_failure() {
        let mut parcel = Parcel::new();
        let err = parcel.read::<String>().unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_type_mismatch_is_transport_failure() {
        let mut parcel = Parcel::new();
        parcel.write("not a number").unwrap();
        assert!(parcel.read::<u64>().unwrap_err().is_transport());

        parcel.rewind();
        assert!(parcel.read_handle().unwrap_err().is_transport());
    }

    #[test]
    fn test_absent_handle_slot() {
        let mut parcel = Parcel::new();
        parcel.write_handle(None);
        assert!(parcel.read_handle().unwrap().is_none());
    }

    #[test]
    fn test_enforce_interface() {
        let mut parcel = Parcel::new();
        parcel.write_interface_token("svcmgr.IServiceRegistry").unwrap();
        assert!(parcel.enforce_interface("svcmgr.IServiceRegistry").is_ok());

        let mut wrong = Parcel::new();
        wrong.write_interface_token("svcmgr.IOther").unwrap();
        match wrong.enforce_interface("svcmgr.IServiceRegistry") {
            Err(Error::DescriptorMismatch { expected, actual }) => {
                assert_eq!(expected, "svcmgr.IServiceRegistry");
                assert_eq!(actual, "svcmgr.IOther");
            }
            other => panic!("Expected DescriptorMismatch, got {:?}", other),
        }
    }
}
