use crate::metadata::heaps::{BlobIndex, SizeDebugWrapper};
use crate::utilities::read_compressed_u32;
use std::fmt::{Debug, Formatter};
use std::io::Cursor;
use owning_ref::ArcRef;

pub struct BlobHeap {
	data: ArcRef<[u8]>,
}

impl From<ArcRef<[u8]>> for BlobHeap {
	fn from(data: ArcRef<[u8]>) -> Self {
		Self { data }
	}
}

impl BlobHeap {
	/// Reads the length-prefixed blob at `idx` (§II.24.2.4): a compressed
	/// unsigned integer giving the byte count, followed by that many bytes.
	pub fn get(&self, idx: BlobIndex) -> Option<&[u8]> {
		let slice = self.data.get(idx.0..)?;
		let mut cursor = Cursor::new(slice);
		let len = read_compressed_u32(&mut cursor).ok()? as usize;
		let start = cursor.position() as usize;
		slice.get(start..start + len)
	}
}

impl Debug for BlobHeap {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_struct("BlobHeap");
		dbg.field("data", &SizeDebugWrapper(self.data.len()));
		dbg.finish()
	}
}
