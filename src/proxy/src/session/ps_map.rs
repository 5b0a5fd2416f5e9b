//! Prepared-statement id translation.
//!
//! A client-visible "external" statement id is allocated by the proxy on
//! every successful `COM_STMT_PREPARE` and handed back to the client in
//! place of the backend's own "internal" id. Every later
//! `COM_STMT_EXECUTE`/`COM_STMT_CLOSE`/`COM_STMT_RESET` carries the external
//! id; the map translates it back to whichever internal id the backend this
//! session is pinned to actually assigned.

use hashbrown::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownPsId(pub u32);

#[derive(Debug, Clone, Default)]
pub struct PsEntry {
    internal_id_by_backend: HashMap<String, u32>,
    pub param_count: u16,
    /// Set once the client has sent the new-params-bound type info for this
    /// statement at least once.
    pub execute_metadata_sent: bool,
    /// The last-seen parameter type-info bytes, kept so a later
    /// `COM_STMT_EXECUTE` with `new-params-bound == 0` can still be
    /// forwarded with valid type metadata spliced back in.
    pub type_info_bytes: Option<Vec<u8>>,
    pub name: Option<String>,
    long_data: HashMap<u16, Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct PsMap {
    next_external_id: u32,
    entries: HashMap<u32, PsEntry>,
}

impl PsMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn allocate(&mut self, param_count: u16, name: Option<String>) -> u32 {
        self.next_external_id += 1;
        let external_id = self.next_external_id;
        self.entries.insert(
            external_id,
            PsEntry {
                param_count,
                name,
                ..Default::default()
            },
        );
        external_id
    }

    pub fn bind_backend_id(&mut self, external_id: u32, backend: &str, internal_id: u32) -> bool {
        match self.entries.get_mut(&external_id) {
            Some(entry) => {
                entry.internal_id_by_backend.insert(backend.to_string(), internal_id);
                true
            }
            None => false,
        }
    }

    pub fn internal_id(&self, external_id: u32, backend: &str) -> Option<u32> {
        self.entries
            .get(&external_id)
            .and_then(|entry| entry.internal_id_by_backend.get(backend))
            .copied()
    }

    pub fn entry(&self, external_id: u32) -> Option<&PsEntry> {
        self.entries.get(&external_id)
    }

    /// Rewrites a `COM_STMT_EXECUTE` payload (command byte included) in
    /// place: the 4-byte statement-id field (payload bytes 1-4) becomes this
    /// backend's internal id, and if the client omitted type info
    /// (`new-params-bound == 0`) but the backend has never seen it for this
    /// statement, the last known type info is spliced back in.
    pub fn rewrite_execute(
        &mut self,
        external_id: u32,
        backend: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, UnknownPsId> {
        let internal_id = self
            .internal_id(external_id, backend)
            .ok_or(UnknownPsId(external_id))?;
        if payload.len() < 5 {
            return Err(UnknownPsId(external_id));
        }
        let entry = self.entries.get_mut(&external_id).ok_or(UnknownPsId(external_id))?;

        let mut out = payload;
        out[1..5].copy_from_slice(&internal_id.to_le_bytes());

        if entry.param_count == 0 {
            return Ok(out);
        }

        // header(1) + stmt_id(4) + flags(1) + iteration_count(4) = 10 bytes,
        // followed by a ceil(param_count/8)-byte null bitmap.
        let null_bitmap_len = (entry.param_count as usize + 7) / 8;
        let flag_offset = 10 + null_bitmap_len;
        if out.len() <= flag_offset {
            return Ok(out);
        }
        let new_params_bound = out[flag_offset];
        if new_params_bound == 0 {
            if entry.execute_metadata_sent {
                if let Some(type_bytes) = &entry.type_info_bytes {
                    let mut spliced = Vec::with_capacity(out.len() + type_bytes.len() + 1);
                    spliced.extend_from_slice(&out[..flag_offset]);
                    spliced.push(1);
                    spliced.extend_from_slice(type_bytes);
                    spliced.extend_from_slice(&out[flag_offset + 1..]);
                    return Ok(spliced);
                }
            }
        } else {
            entry.execute_metadata_sent = true;
            let type_info_start = flag_offset + 1;
            let type_info_len = entry.param_count as usize * 2;
            if out.len() >= type_info_start + type_info_len {
                entry.type_info_bytes =
                    Some(out[type_info_start..type_info_start + type_info_len].to_vec());
            }
        }
        Ok(out)
    }

    pub fn remove(&mut self, external_id: u32) -> Option<PsEntry> {
        self.entries.remove(&external_id)
    }

    /// `COM_STMT_RESET` clears any `COM_STMT_SEND_LONG_DATA` accumulated for
    /// this statement without invalidating the statement handle itself.
    pub fn reset(&mut self, external_id: u32) {
        if let Some(entry) = self.entries.get_mut(&external_id) {
            entry.long_data.clear();
        }
    }

    pub fn append_long_data(&mut self, external_id: u32, param: u16, data: &[u8]) {
        if let Some(entry) = self.entries.get_mut(&external_id) {
            entry.long_data.entry(param).or_default().extend_from_slice(data);
        }
    }

    pub fn long_data(&self, external_id: u32, param: u16) -> Option<&[u8]> {
        self.entries
            .get(&external_id)
            .and_then(|e| e.long_data.get(&param))
            .map(|v| v.as_slice())
    }

    /// `COM_CHANGE_USER` invalidates every prepared statement on the
    /// connection; the backend forgets its internal ids along with it.
    pub fn clear(&mut self) {
        self.next_external_id = 0;
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_returns_distinct_increasing_ids() {
        let mut map = PsMap::new_for_test();
        let a = map.allocate(2, None);
        let b = map.allocate(0, None);
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn bind_and_lookup_internal_id_round_trips() {
        let mut map = PsMap::new_for_test();
        let ext = map.allocate(1, None);
        assert!(map.bind_backend_id(ext, "backend-a", 77));
        assert_eq!(map.internal_id(ext, "backend-a"), Some(77));
        assert_eq!(map.internal_id(ext, "backend-b"), None);
    }

    #[test]
    fn rewrite_execute_substitutes_internal_id() {
        let mut map = PsMap::new_for_test();
        let ext = map.allocate(0, None);
        map.bind_backend_id(ext, "backend-a", 555);
        let payload = vec![0x17, 0xff, 0xff, 0xff, 0xff, 0x00, 0x01, 0x00, 0x00, 0x00];
        let rewritten = map.rewrite_execute(ext, "backend-a", payload).unwrap();
        assert_eq!(&rewritten[1..5], &555u32.to_le_bytes());
    }

    #[test]
    fn rewrite_execute_fails_for_unknown_statement() {
        let mut map = PsMap::new_for_test();
        let err = map.rewrite_execute(999, "backend-a", vec![0x17, 0, 0, 0, 0]);
        assert_eq!(err.unwrap_err(), UnknownPsId(999));
    }

    #[test]
    fn reset_clears_long_data_but_keeps_statement() {
        let mut map = PsMap::new_for_test();
        let ext = map.allocate(1, None);
        map.append_long_data(ext, 0, b"chunk");
        assert_eq!(map.long_data(ext, 0), Some(&b"chunk"[..]));
        map.reset(ext);
        assert_eq!(map.long_data(ext, 0), None);
        assert!(map.entry(ext).is_some());
    }

    #[test]
    fn remove_drops_the_statement_entirely() {
        let mut map = PsMap::new_for_test();
        let ext = map.allocate(0, None);
        assert!(map.remove(ext).is_some());
        assert!(map.entry(ext).is_none());
    }

    #[test]
    fn clear_drops_every_statement_and_resets_id_allocation() {
        let mut map = PsMap::new_for_test();
        let ext = map.allocate(1, None);
        map.bind_backend_id(ext, "backend-a", 42);
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.internal_id(ext, "backend-a"), None);
        let next = map.allocate(0, None);
        assert_eq!(next, 1);
    }

    impl PsMap {
        fn new_for_test() -> Self {
            PsMap::default()
        }
    }
}
