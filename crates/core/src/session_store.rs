use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::session::{Session, UserId};

type Slot = Arc<Mutex<Option<Session>>>;
type Slots = Arc<RwLock<HashMap<UserId, Slot>>>;

/// In-memory sessions keyed by user, with one lock per user.
///
/// The map lock is only held long enough to find or insert a user's slot, so
/// different users never wait on each other. Holding a [`SessionGuard`]
/// serializes every event for that user until the guard drops. Slots left
/// empty are dropped from the map once nobody holds or waits on them.
#[derive(Clone, Default)]
pub struct SessionStore {
    slots: Slots,
}

pub struct SessionGuard {
    user_id: UserId,
    slot: OwnedMutexGuard<Option<Session>>,
    slots: Slots,
}

impl SessionGuard {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn get(&self) -> Option<&Session> {
        self.slot.as_ref()
    }

    pub fn get_or_create(&mut self) -> &mut Session {
        let user_id = self.user_id;
        self.slot.get_or_insert_with(|| Session::new(user_id))
    }

    pub fn put(&mut self, session: Session) {
        *self.slot = Some(session);
    }

    pub fn delete(&mut self) -> Option<Session> {
        self.slot.take()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.slot.is_some() {
            return;
        }
        // Contended map: the next new user's lookup sweeps it instead.
        let Ok(mut slots) = self.slots.try_write() else {
            return;
        };
        let mutex = OwnedMutexGuard::mutex(&self.slot);
        // One reference in the map, one in this guard: no other event waits.
        let unused = Arc::strong_count(mutex) == 2
            && slots.get(&self.user_id).is_some_and(|slot| Arc::ptr_eq(slot, mutex));
        if unused {
            slots.remove(&self.user_id);
        }
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `user_id`'s session.
    pub async fn acquire(&self, user_id: UserId) -> SessionGuard {
        let slot = self.slot(user_id).await;
        SessionGuard { user_id, slot: slot.lock_owned().await, slots: Arc::clone(&self.slots) }
    }

    pub async fn get(&self, user_id: UserId) -> Option<Session> {
        self.acquire(user_id).await.get().cloned()
    }

    pub async fn put(&self, session: Session) {
        self.acquire(session.user_id).await.put(session);
    }

    pub async fn delete(&self, user_id: UserId) -> Option<Session> {
        self.acquire(user_id).await.delete()
    }

    /// Sessions currently present. Slots locked by an in-flight event count
    /// as active.
    pub async fn active_sessions(&self) -> usize {
        let slots = self.slots.read().await;
        slots
            .values()
            .filter(|slot| slot.try_lock().map(|session| session.is_some()).unwrap_or(true))
            .count()
    }

    async fn slot(&self, user_id: UserId) -> Slot {
        if let Some(slot) = self.slots.read().await.get(&user_id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        slots.retain(|_, slot| {
            Arc::strong_count(slot) > 1
                || slot.try_lock().map_or(true, |session| session.is_some())
        });
        Arc::clone(slots.entry(user_id).or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::domain::session::{Session, Step, UserId};
    use crate::session_store::SessionStore;

    #[tokio::test]
    async fn get_put_delete_round_trip_per_user() {
        let store = SessionStore::new();
        assert!(store.get(UserId(1)).await.is_none());

        let mut session = Session::new(UserId(1));
        session.step = Step::AwaitingName;
        store.put(session.clone()).await;
        store.put(Session::new(UserId(2))).await;

        assert_eq!(store.get(UserId(1)).await, Some(session));
        assert_eq!(store.active_sessions().await, 2);

        assert!(store.delete(UserId(1)).await.is_some());
        assert!(store.get(UserId(1)).await.is_none());
        assert_eq!(store.active_sessions().await, 1);
    }

    #[tokio::test]
    async fn deleted_and_unknown_users_leave_no_slot_behind() {
        let store = SessionStore::new();
        store.put(Session::new(UserId(1))).await;
        store.put(Session::new(UserId(2))).await;
        assert!(store.get(UserId(3)).await.is_none());
        assert_eq!(store.slots.read().await.len(), 2);

        let mut guard = store.acquire(UserId(1)).await;
        assert!(guard.delete().is_some());
        drop(guard);

        assert_eq!(store.slots.read().await.len(), 1);
        assert_eq!(store.active_sessions().await, 1);
    }

    #[tokio::test]
    async fn a_waiting_event_keeps_the_deleted_slot() {
        let store = SessionStore::new();
        store.put(Session::new(UserId(5))).await;

        let mut guard = store.acquire(UserId(5)).await;
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut guard = store.acquire(UserId(5)).await;
                guard.get_or_create().step = Step::AwaitingName;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        guard.delete();
        drop(guard);
        waiter.await.expect("waiter completes");

        assert_eq!(store.get(UserId(5)).await.map(|s| s.step), Some(Step::AwaitingName));
        assert_eq!(store.slots.read().await.len(), 1);
    }

    #[tokio::test]
    async fn guard_creates_a_fresh_session_on_first_contact() {
        let store = SessionStore::new();
        let mut guard = store.acquire(UserId(9)).await;

        assert_eq!(guard.get_or_create().step, Step::AwaitingPhone);
        assert_eq!(guard.user_id(), UserId(9));
        drop(guard);
        assert!(store.get(UserId(9)).await.is_some());
    }

    #[tokio::test]
    async fn same_user_events_are_serialized() {
        let store = SessionStore::new();
        store.put(Session::new(UserId(5))).await;

        let guard = store.acquire(UserId(5)).await;
        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut guard = store.acquire(UserId(5)).await;
                guard.get_or_create().step = Step::AwaitingWarehouse;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Another user is not blocked by user 5's guard.
        store.put(Session::new(UserId(6))).await;

        drop(guard);
        contender.await.expect("contender completes");
        assert_eq!(store.get(UserId(5)).await.map(|s| s.step), Some(Step::AwaitingWarehouse));
    }

    #[tokio::test]
    async fn concurrent_users_proceed_in_parallel() {
        let store = Arc::new(SessionStore::new());
        let tasks: Vec<_> = (0..16)
            .map(|id| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let mut guard = store.acquire(UserId(id)).await;
                    guard.get_or_create().phone_number = Some(format!("+{id}"));
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("task completes");
        }

        assert_eq!(store.active_sessions().await, 16);
    }
}
