//! In-memory run store.

use async_trait::async_trait;
use shipyard_core::pipeline::{PipelineRun, RunStatus};
use shipyard_core::store::RunStore;
use shipyard_core::{Error, ResourceId, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Runs kept in process memory; lost on restart.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<ResourceId, PipelineRun>>,
    counter: AtomicU64,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(runs: &mut [PipelineRun]) {
    runs.sort_by(|a, b| b.number.cmp(&a.number).then(b.created_at.cmp(&a.created_at)));
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn next_number(&self) -> Result<u64> {
        Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert(&self, run: &PipelineRun) -> Result<()> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(Error::Conflict(format!("run {} already exists", run.id)));
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get(&self, id: ResourceId) -> Result<PipelineRun> {
        self.runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("run {}", id)))
    }

    async fn save(&self, run: &PipelineRun) -> Result<()> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run.id) {
            Some(stored) => {
                *stored = run.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("run {}", run.id))),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        let mut runs: Vec<PipelineRun> = self.runs.read().await.values().cloned().collect();
        newest_first(&mut runs);
        runs.truncate(limit);
        Ok(runs)
    }

    async fn list_by_status(&self, status: RunStatus) -> Result<Vec<PipelineRun>> {
        let mut runs: Vec<PipelineRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        newest_first(&mut runs);
        Ok(runs)
    }

    async fn delete(&self, id: ResourceId) -> Result<()> {
        self.runs
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("run {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::pipeline::TriggerEvent;

    async fn new_run(store: &MemoryRunStore) -> PipelineRun {
        let number = store.next_number().await.unwrap();
        let run = PipelineRun::new(number, "app", TriggerEvent::manual(None));
        store.insert(&run).await.unwrap();
        run
    }

    #[tokio::test]
    async fn test_numbers_increase() {
        let store = MemoryRunStore::new();
        assert_eq!(store.next_number().await.unwrap(), 1);
        assert_eq!(store.next_number().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_get_save_delete() {
        let store = MemoryRunStore::new();
        let mut run = new_run(&store).await;
        assert!(matches!(store.insert(&run).await, Err(Error::Conflict(_))));

        run.cancel("stop").unwrap();
        store.save(&run).await.unwrap();
        assert_eq!(store.get(run.id).await.unwrap().status, RunStatus::Cancelled);

        store.delete(run.id).await.unwrap();
        assert!(matches!(store.get(run.id).await, Err(Error::NotFound(_))));
        assert!(matches!(store.save(&run).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = MemoryRunStore::new();
        let first = new_run(&store).await;
        let mut second = new_run(&store).await;
        second.cancel("stop").unwrap();
        store.save(&second).await.unwrap();

        let all = store.list(10).await.unwrap();
        assert_eq!(all.iter().map(|r| r.number).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(store.list(1).await.unwrap().len(), 1);

        let running = store.list_by_status(RunStatus::Running).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, first.id);
    }
}
