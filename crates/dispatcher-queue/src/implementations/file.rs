//! File-backed durable queue backend.
//!
//! Each message is one JSON file in the queue directory, named by a
//! monotonically increasing sequence number so directory order is FIFO
//! order. Writes go through a temp file and an atomic rename; a process
//! restart resumes from whatever files survive on disk.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::{QueueError, QueueInterface};

/// Durable FIFO queue persisted to a directory.
pub struct FileQueue<T> {
	/// Directory holding one `<seq>-<uuid>.json` file per message.
	dir: PathBuf,
	/// Next sequence number, resumed from disk on startup.
	seq: AtomicU64,
	/// Serializes receive operations so items are delivered at most once.
	receive_lock: Mutex<()>,
	_marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> FileQueue<T> {
	/// Opens (or creates) a file queue at the given directory.
	pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
		let dir = dir.into();
		fs::create_dir_all(&dir)
			.await
			.map_err(|e| QueueError::Backend(format!("failed to create queue dir: {}", e)))?;

		// Resume the sequence counter past any surviving messages.
		let mut next_seq = 0u64;
		let mut entries = fs::read_dir(&dir)
			.await
			.map_err(|e| QueueError::Backend(e.to_string()))?;
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| QueueError::Backend(e.to_string()))?
		{
			if let Some(seq) = parse_seq(&entry.file_name().to_string_lossy()) {
				next_seq = next_seq.max(seq + 1);
			}
		}

		Ok(Self {
			dir,
			seq: AtomicU64::new(next_seq),
			receive_lock: Mutex::new(()),
			_marker: std::marker::PhantomData,
		})
	}

	/// Returns the sorted ids of all persisted messages.
	async fn message_ids(&self) -> Result<Vec<String>, QueueError> {
		let mut ids = Vec::new();
		let mut entries = fs::read_dir(&self.dir)
			.await
			.map_err(|e| QueueError::Backend(e.to_string()))?;
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| QueueError::Backend(e.to_string()))?
		{
			let name = entry.file_name().to_string_lossy().into_owned();
			if let Some(id) = name.strip_suffix(".json") {
				if parse_seq(&name).is_some() {
					ids.push(id.to_string());
				}
			}
		}
		ids.sort();
		Ok(ids)
	}

	fn path_for(&self, id: &str) -> PathBuf {
		self.dir.join(format!("{}.json", id))
	}
}

/// Extracts the sequence number from a `<seq>-<uuid>.json` file name.
fn parse_seq(file_name: &str) -> Option<u64> {
	file_name
		.strip_suffix(".json")?
		.split('-')
		.next()?
		.parse()
		.ok()
}

#[async_trait]
impl<T> QueueInterface<T> for FileQueue<T>
where
	T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
	async fn push(&self, item: T) -> Result<String, QueueError> {
		let seq = self.seq.fetch_add(1, Ordering::SeqCst);
		let id = format!("{:020}-{}", seq, uuid::Uuid::new_v4());

		let bytes =
			serde_json::to_vec(&item).map_err(|e| QueueError::Serialization(e.to_string()))?;

		// Write atomically by writing to a temp file then renaming.
		let path = self.path_for(&id);
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, bytes)
			.await
			.map_err(|e| QueueError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| QueueError::Backend(e.to_string()))?;

		Ok(id)
	}

	async fn receive_many(&self, max: usize) -> Result<Vec<(String, T)>, QueueError> {
		let _guard = self.receive_lock.lock().await;

		let ids = self.message_ids().await?;
		let mut received = Vec::new();

		for id in ids.into_iter().take(max) {
			let path = self.path_for(&id);
			let bytes = match fs::read(&path).await {
				Ok(bytes) => bytes,
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
				Err(e) => return Err(QueueError::Backend(e.to_string())),
			};

			let item: T = match serde_json::from_slice(&bytes) {
				Ok(item) => item,
				Err(e) => {
					// A half-written legacy file should not wedge the queue.
					tracing::warn!(id = %id, error = %e, "dropping undecodable queue message");
					fs::remove_file(&path)
						.await
						.map_err(|e| QueueError::Backend(e.to_string()))?;
					continue;
				}
			};

			fs::remove_file(&path)
				.await
				.map_err(|e| QueueError::Backend(e.to_string()))?;
			received.push((id, item));
		}

		Ok(received)
	}

	async fn len(&self) -> Result<usize, QueueError> {
		Ok(self.message_ids().await?.len())
	}
}
