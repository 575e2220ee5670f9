use std::collections::{hash_map::Entry, HashMap, VecDeque};

use log::warn;

use cmdchan_shared::{RouteId, SyncPointId, SyncPointToken};

use crate::{error::ChannelError, stub::Stub};

/// A stub plus the channel's bookkeeping about it.
pub struct StubEntry {
    pub stub: Box<dyn Stub>,
    /// Last scheduling state the channel accounted for.
    pub descheduled: bool,
    /// Sync points bound to this stub, in the order it will reach them.
    /// Dropping the entry retires whatever is left.
    sync_points: VecDeque<SyncPointToken>,
}

impl StubEntry {
    fn new(stub: Box<dyn Stub>) -> Self {
        Self {
            stub,
            descheduled: false,
            sync_points: VecDeque::new(),
        }
    }

    pub fn bind_sync_point(&mut self, sync_point: SyncPointToken) {
        self.sync_points.push_back(sync_point);
    }

    /// The stub has reached `sync_point`; retire it.
    pub fn complete_sync_point(&mut self, sync_point: SyncPointId) {
        let Some(index) = self
            .sync_points
            .iter()
            .position(|token| token.id() == sync_point)
        else {
            warn!("sync point {} is not bound to this stub", sync_point);
            return;
        };
        if index != 0 {
            warn!("sync point {} retired out of order", sync_point);
        }
        if let Some(token) = self.sync_points.remove(index) {
            self.stub.sync_point_retired(sync_point);
            if let Err(err) = token.retire() {
                warn!("{}", err);
            }
        }
    }

    pub fn pending_sync_points(&self) -> usize {
        self.sync_points.len()
    }
}

/// Route id to stub mapping for one channel.
#[derive(Default)]
pub struct RouteTable {
    stubs: HashMap<RouteId, StubEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, route_id: RouteId, stub: Box<dyn Stub>) -> Result<(), ChannelError> {
        match self.stubs.entry(route_id) {
            Entry::Occupied(_) => Err(ChannelError::RouteConflict { route_id }),
            Entry::Vacant(slot) => {
                slot.insert(StubEntry::new(stub));
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, route_id: RouteId) -> Option<StubEntry> {
        self.stubs.remove(&route_id)
    }

    pub fn get(&self, route_id: RouteId) -> Option<&StubEntry> {
        self.stubs.get(&route_id)
    }

    pub fn get_mut(&mut self, route_id: RouteId) -> Option<&mut StubEntry> {
        self.stubs.get_mut(&route_id)
    }

    pub fn contains(&self, route_id: RouteId) -> bool {
        self.stubs.contains_key(&route_id)
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &StubEntry> {
        self.stubs.values()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut StubEntry> {
        self.stubs.values_mut()
    }

    pub fn clear(&mut self) {
        self.stubs.clear();
    }
}
