//! The Resource Directory (spec §4.F): the authoritative in-memory map of
//! Z-Wave nodes and their endpoints, write-through to an external
//! key-value store. Grounded in the teacher's `node/storage.rs`
//! (`BTreeMap`-keyed endpoint storage) and `controller/storage.rs`
//! (interior-mutability-friendly fixed tables), adapted to the fixed-size
//! `Option<Entry>` slot array spec §9 calls for instead of the teacher's
//! growable node list.

use crate::error::Result;
use cookie_factory as cf;
use nom::number::complete::{be_u16, be_u32, be_u8};
use std::collections::BTreeMap;
use std::sync::Mutex;
use zwip_core::error::Error as CoreError;

/// `1..=MAX_NODES`, per spec §6's persistent-state key layout.
pub const MAX_NODES: usize = 232;
pub const MAX_DSK_LEN: usize = 16;
pub const MAX_NAME_LEN: usize = 32;

/// Node lifecycle state machine (spec §4.F). `advance()` walks the happy
/// path; any state can be pushed to `Failing` by the caller when a probe
/// step reports an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Created,
    ProbeNodeInfo,
    ProbeProductId,
    EnumerateEndpoints,
    FindEndpoints,
    CheckWucVersion,
    GetWakeUpCapabilities,
    SetWakeUpInterval,
    AssignReturnRoute,
    ProbeWakeUpInterval,
    ProbeEndpoints,
    MdnsProbe,
    MdnsEndpointProbe,
    Done,
    ProbeFail,
    Failing,
}

impl NodeState {
    /// The next state on the happy path, or `None` once `Done` (or a
    /// failure state) is reached.
    pub fn advance(self) -> Option<NodeState> {
        use NodeState::*;
        Some(match self {
            Created => ProbeNodeInfo,
            ProbeNodeInfo => ProbeProductId,
            ProbeProductId => EnumerateEndpoints,
            EnumerateEndpoints => FindEndpoints,
            FindEndpoints => CheckWucVersion,
            CheckWucVersion => GetWakeUpCapabilities,
            GetWakeUpCapabilities => SetWakeUpInterval,
            SetWakeUpInterval => AssignReturnRoute,
            AssignReturnRoute => ProbeWakeUpInterval,
            ProbeWakeUpInterval => ProbeEndpoints,
            ProbeEndpoints => MdnsProbe,
            MdnsProbe => MdnsEndpointProbe,
            MdnsEndpointProbe => Done,
            Done | ProbeFail | Failing => return None,
        })
    }

    pub fn is_done(self) -> bool {
        matches!(self, NodeState::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeMode {
    #[default]
    Probing,
    Deleted,
    Failed,
    LowBattery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointState {
    #[default]
    ProbeInfo,
    ProbeSecurity2Class2Info,
    ProbeSecurity2Class1Info,
    ProbeSecurity2Class0Info,
    ProbeSecurity0Info,
    ProbeVersion,
    ProbeZWavePlus,
    MdnsProbe,
    MdnsProbeInProgress,
    ProbeDone,
    ProbeFail,
}

#[derive(Debug, Clone, Default)]
pub struct Endpoint {
    pub endpoint_id: u8,
    pub nodeid: u16,
    pub generic_device_class: u8,
    pub specific_device_class: u8,
    pub command_classes: Vec<u8>,
    pub name: String,
    pub location: String,
    pub aggregated_members: Vec<u8>,
    pub state: EndpointState,
}

impl Endpoint {
    pub fn root(nodeid: u16) -> Self {
        Self {
            endpoint_id: 0,
            nodeid,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub nodeid: u16,
    pub node_type: u8,
    pub security_flags: u8,
    pub wakeup_interval: u32,
    pub dsk: Vec<u8>,
    pub name: String,
    pub cc_versions: BTreeMap<u8, u8>,
    pub state: NodeState,
    pub mode: NodeMode,
    pub probe_flags: u8,
    pub endpoints: BTreeMap<u8, Endpoint>,
    pub refcnt: u32,
}

impl NodeEntry {
    fn new(nodeid: u16) -> Self {
        let mut endpoints = BTreeMap::new();
        endpoints.insert(0, Endpoint::root(nodeid));
        Self {
            nodeid,
            node_type: 0,
            security_flags: 0,
            wakeup_interval: 0,
            dsk: Vec::new(),
            name: String::new(),
            cc_versions: BTreeMap::new(),
            state: NodeState::Created,
            mode: NodeMode::Probing,
            probe_flags: 0,
            endpoints,
            refcnt: 0,
        }
    }

    fn serialize_record(&self) -> Vec<u8> {
        let write = cf::sequence::tuple((
            cf::bytes::be_u16(self.nodeid),
            cf::bytes::be_u8(self.node_type),
            cf::bytes::be_u8(self.security_flags),
            cf::bytes::be_u32(self.wakeup_interval),
        ));
        cf::gen_simple(write, Vec::new()).expect("serialization is infallible")
    }

    fn parse_record(nodeid: u16, buf: &[u8]) -> Option<Self> {
        let (i, _stored_id) = be_u16::<_, nom::error::Error<&[u8]>>(buf).ok()?;
        let (i, node_type) = be_u8::<_, nom::error::Error<&[u8]>>(i).ok()?;
        let (i, security_flags) = be_u8::<_, nom::error::Error<&[u8]>>(i).ok()?;
        let (_i, wakeup_interval) = be_u32::<_, nom::error::Error<&[u8]>>(i).ok()?;
        let mut entry = NodeEntry::new(nodeid);
        entry.node_type = node_type;
        entry.security_flags = security_flags;
        entry.wakeup_interval = wakeup_interval;
        Some(entry)
    }
}

/// Events callers (the router loop, the virtual netif) react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdEvent {
    Done(u16),
    Failed(u16),
}

/// The write-through persistence interface named in spec §4.F/§6. Keys are
/// the flat integer layout spec §6 reserves: node records at `1..=MAX_NODES`,
/// names at `MAX_NODES+1..=2*MAX_NODES`, DSKs at `2*MAX_NODES+1..=3*MAX_NODES`,
/// CC-version tables at `3*MAX_NODES+1..=4*MAX_NODES`.
pub trait Store: Send + Sync {
    fn put(&self, key: u32, value: &[u8]) -> Result<()>;
    fn get(&self, key: u32) -> Result<Option<Vec<u8>>>;
    fn delete(&self, key: u32) -> Result<()>;
}

/// A `BTreeMap`-backed `Store`, standing in for the external NVM/key-value
/// backend spec §1 names as an out-of-scope collaborator.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<u32, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn put(&self, key: u32, value: &[u8]) -> Result<()> {
        self.entries.lock().unwrap().insert(key, value.to_vec());
        Ok(())
    }

    fn get(&self, key: u32) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(&key).cloned())
    }

    fn delete(&self, key: u32) -> Result<()> {
        self.entries.lock().unwrap().remove(&key);
        Ok(())
    }
}

impl<T: Store> Store for std::sync::Arc<T> {
    fn put(&self, key: u32, value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }

    fn get(&self, key: u32) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn delete(&self, key: u32) -> Result<()> {
        (**self).delete(key)
    }
}

fn record_key(nodeid: u16) -> u32 {
    nodeid as u32
}

fn name_key(nodeid: u16) -> u32 {
    MAX_NODES as u32 + nodeid as u32
}

fn dsk_key(nodeid: u16) -> u32 {
    2 * MAX_NODES as u32 + nodeid as u32
}

/// The in-memory node table, indexed `nodeid - 1` (spec invariant 1).
pub struct ResourceDirectory<S: Store> {
    slots: Vec<Option<NodeEntry>>,
    store: S,
}

impl<S: Store> ResourceDirectory<S> {
    pub fn new(store: S) -> Self {
        Self {
            slots: vec![None; MAX_NODES],
            store,
        }
    }

    fn index(nodeid: u16) -> Option<usize> {
        if nodeid == 0 || nodeid as usize > MAX_NODES {
            return None;
        }
        Some(nodeid as usize - 1)
    }

    /// Allocates a fresh `Created` entry for `nodeid`. Returns `false` if
    /// the id is out of range or already occupied (spec invariant 1: a
    /// node occupies at most one slot).
    pub fn alloc(&mut self, nodeid: u16) -> bool {
        let Some(index) = Self::index(nodeid) else {
            return false;
        };
        if self.slots[index].is_some() {
            return false;
        }
        self.slots[index] = Some(NodeEntry::new(nodeid));
        true
    }

    /// Loads a node record from the store, allocating the slot if it
    /// parses successfully. Bad records are ignored per spec §7
    /// `ConfigInvalid` ("ignore the record and continue with defaults").
    pub fn import_from_store(&mut self, nodeid: u16) -> Result<bool> {
        let Some(index) = Self::index(nodeid) else {
            return Ok(false);
        };
        let Some(raw) = self.store.get(record_key(nodeid))? else {
            return Ok(false);
        };
        let Some(mut entry) = NodeEntry::parse_record(nodeid, &raw) else {
            return Err(CoreError::ConfigInvalid(format!(
                "node record {nodeid} could not be parsed"
            ))
            .into());
        };
        if let Some(name) = self.store.get(name_key(nodeid))? {
            entry.name = String::from_utf8_lossy(&name).into_owned();
        }
        if let Some(dsk) = self.store.get(dsk_key(nodeid))? {
            entry.dsk = dsk;
        }
        self.slots[index] = Some(entry);
        Ok(true)
    }

    fn persist(&self, entry: &NodeEntry) -> Result<()> {
        self.store.put(record_key(entry.nodeid), &entry.serialize_record())?;
        self.store.put(name_key(entry.nodeid), entry.name.as_bytes())?;
        self.store.put(dsk_key(entry.nodeid), &entry.dsk)?;
        Ok(())
    }

    /// Frees a node's slot (and, per invariant 3, every endpoint hanging
    /// off it) and removes its persisted records.
    pub fn free(&mut self, nodeid: u16) -> Result<()> {
        let Some(index) = Self::index(nodeid) else {
            return Ok(());
        };
        self.slots[index] = None;
        self.store.delete(record_key(nodeid))?;
        self.store.delete(name_key(nodeid))?;
        self.store.delete(dsk_key(nodeid))?;
        Ok(())
    }

    pub fn get(&self, nodeid: u16) -> Option<&NodeEntry> {
        Self::index(nodeid).and_then(|i| self.slots[i].as_ref())
    }

    pub fn get_mut(&mut self, nodeid: u16) -> Option<&mut NodeEntry> {
        Self::index(nodeid).and_then(|i| self.slots[i].as_mut())
    }

    /// The first occupied slot whose probe state machine hasn't reached
    /// `Done`/`Failing`, for the router loop to step (spec §4.I step 3).
    pub fn first_pending(&self) -> Option<u16> {
        self.slots
            .iter()
            .flatten()
            .find(|e| !matches!(e.state, NodeState::Done | NodeState::Failing | NodeState::ProbeFail))
            .map(|e| e.nodeid)
    }

    pub fn first_endpoint(&self, nodeid: u16) -> Option<&Endpoint> {
        self.get(nodeid)?.endpoints.values().next()
    }

    pub fn next_endpoint(&self, nodeid: u16, after: u8) -> Option<&Endpoint> {
        self.get(nodeid)?
            .endpoints
            .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
            .next()
            .map(|(_, ep)| ep)
    }

    pub fn lookup_by_dsk(&self, dsk: &[u8]) -> Option<u16> {
        self.slots
            .iter()
            .flatten()
            .find(|e| !e.dsk.is_empty() && e.dsk == dsk)
            .map(|e| e.nodeid)
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<u16> {
        self.slots
            .iter()
            .flatten()
            .find(|e| e.name == name)
            .map(|e| e.nodeid)
    }

    /// Sets `nodeid`'s DSK, evicting (zeroing) any other node's identical
    /// DSK first — spec §4.F's dedup invariant.
    pub fn add_dsk(&mut self, nodeid: u16, dsk: Vec<u8>) -> Result<()> {
        if dsk.len() > MAX_DSK_LEN {
            return Err(CoreError::OutOfMemory.into());
        }
        if let Some(holder) = self.lookup_by_dsk(&dsk) {
            if holder != nodeid {
                if let Some(index) = Self::index(holder) {
                    if let Some(entry) = self.slots[index].as_mut() {
                        entry.dsk.clear();
                    }
                }
            }
        }
        let Some(index) = Self::index(nodeid) else {
            return Err(CoreError::NodeUnknown(nodeid).into());
        };
        let entry = self.slots[index]
            .as_mut()
            .ok_or(CoreError::NodeUnknown(nodeid))?;
        entry.dsk = dsk;
        let entry = entry.clone();
        self.persist(&entry)
    }

    pub fn cc_version_get(&self, nodeid: u16, cc: u8) -> Option<u8> {
        self.get(nodeid)?.cc_versions.get(&cc).copied()
    }

    pub fn cc_version_set(&mut self, nodeid: u16, cc: u8, version: u8) -> Result<()> {
        let entry = self.get_mut(nodeid).ok_or(CoreError::NodeUnknown(nodeid))?;
        entry.cc_versions.insert(cc, version);
        Ok(())
    }

    /// Records the interval reported by `Wake Up:Interval Report` (spec
    /// §4.G `ProbeWakeUpInterval`).
    pub fn set_wakeup_interval(&mut self, nodeid: u16, seconds: u32) -> Result<()> {
        let entry = self.get_mut(nodeid).ok_or(CoreError::NodeUnknown(nodeid))?;
        entry.wakeup_interval = seconds;
        Ok(())
    }

    /// Advances `nodeid`'s probe state machine by one step, returning an
    /// [`RdEvent`] on entry into `Done`.
    pub fn advance(&mut self, nodeid: u16) -> Result<Option<RdEvent>> {
        let entry = self.get_mut(nodeid).ok_or(CoreError::NodeUnknown(nodeid))?;
        let Some(next) = entry.state.advance() else {
            return Ok(None);
        };
        entry.state = next;
        Ok(next.is_done().then_some(RdEvent::Done(nodeid)))
    }

    /// Marks `nodeid` failed, returning [`RdEvent::Failed`] so the netif
    /// can retract its address (spec §4.F: "Entry into Failed removes the
    /// netif address but retains the record").
    pub fn fail(&mut self, nodeid: u16) -> Result<RdEvent> {
        let entry = self.get_mut(nodeid).ok_or(CoreError::NodeUnknown(nodeid))?;
        entry.state = NodeState::Failing;
        entry.mode = NodeMode::Failed;
        Ok(RdEvent::Failed(nodeid))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn at_most_one_entry_per_nodeid() {
        let mut rd = ResourceDirectory::new(MemoryStore::new());
        assert!(rd.alloc(7));
        assert!(!rd.alloc(7));
        assert!(rd.get(7).is_some());
    }

    #[test]
    fn dsk_dedup_evicts_the_older_holder() {
        let mut rd = ResourceDirectory::new(MemoryStore::new());
        rd.alloc(1);
        rd.alloc(2);
        let dsk = vec![0xaa; 16];
        rd.add_dsk(1, dsk.clone()).unwrap();
        rd.add_dsk(2, dsk.clone()).unwrap();
        assert!(rd.get(1).unwrap().dsk.is_empty());
        assert_eq!(rd.get(2).unwrap().dsk, dsk);
    }

    #[test]
    fn state_machine_reaches_done_and_emits_event() {
        let mut rd = ResourceDirectory::new(MemoryStore::new());
        rd.alloc(7);
        let mut event = None;
        for _ in 0..20 {
            if let Some(e) = rd.advance(7).unwrap() {
                event = Some(e);
                break;
            }
        }
        assert_eq!(event, Some(RdEvent::Done(7)));
        assert_eq!(rd.get(7).unwrap().state, NodeState::Done);
    }

    #[test]
    fn free_removes_the_slot_and_its_endpoints() {
        let mut rd = ResourceDirectory::new(MemoryStore::new());
        rd.alloc(3);
        assert!(rd.first_endpoint(3).is_some());
        rd.free(3).unwrap();
        assert!(rd.get(3).is_none());
    }

    #[test]
    fn import_from_store_round_trips_basic_fields() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let mut writer = ResourceDirectory::new(store.clone());
        writer.alloc(5);
        writer.get_mut(5).unwrap().node_type = 0x04;
        writer.get_mut(5).unwrap().wakeup_interval = 3600;
        writer.get_mut(5).unwrap().name = "kitchen-switch".to_string();
        let entry = writer.get(5).unwrap().clone();
        writer.persist(&entry).unwrap();

        let mut reader = ResourceDirectory::new(store);
        assert!(reader.import_from_store(5).unwrap());
        let loaded = reader.get(5).unwrap();
        assert_eq!(loaded.node_type, 0x04);
        assert_eq!(loaded.wakeup_interval, 3600);
        assert_eq!(loaded.name, "kitchen-switch");
    }
}
