use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use sqlx::SqlitePool;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::notify::{self, Notifier, RoomEventKind};
use crate::rooms::{self, Room};

/// How long before the start time the reminder fires.
pub const REMINDER_LEAD: time::Duration = time::Duration::minutes(5);

fn reminder_key(room_id: &str) -> String {
    format!("{room_id}_reminder")
}

/// One-shot start/reminder jobs per room, keyed `roomId` and
/// `roomId_reminder`. Jobs are aborted spawned sleeps; rescheduling always
/// cancels before registering, so at most one live pair exists per room.
/// Jobs are not persisted — `schedule_all_future_rooms` rebuilds them at
/// startup.
pub struct RoomScheduler {
    db_pool: SqlitePool,
    notifier: Arc<dyn Notifier>,
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl RoomScheduler {
    pub fn new(db_pool: SqlitePool, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Arc::new(Self {
            db_pool,
            notifier,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Registers the start job (and the reminder job when its fire time is
    /// still ahead) for a room. No start time, or a start time already
    /// passed, schedules nothing. Calling this again for the same room
    /// replaces any jobs registered earlier.
    pub async fn schedule_room_start(self: &Arc<Self>, room: &Room) {
        let Some(start_time) = room.start_time else {
            tracing::debug!(room = %room.id, "no start time set, nothing to schedule");
            return;
        };

        let now = OffsetDateTime::now_utc();
        if start_time <= now {
            tracing::debug!(room = %room.id, %start_time, "start time already passed");
            return;
        }

        self.cancel_room_start(&room.id).await;

        let reminder_time = start_time - REMINDER_LEAD;
        let mut jobs = self.jobs.lock().await;

        if reminder_time > now {
            let handle = self.spawn_job(&room.id, RoomEventKind::RoomReminder, reminder_time - now);
            jobs.insert(reminder_key(&room.id), handle);
        }

        let handle = self.spawn_job(&room.id, RoomEventKind::RoomStart, start_time - now);
        jobs.insert(room.id.clone(), handle);

        tracing::info!(room = %room.id, %start_time, "room start scheduled");
    }

    fn spawn_job(
        self: &Arc<Self>,
        room_id: &str,
        kind: RoomEventKind,
        delay: time::Duration,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let room_id = room_id.to_owned();
        let wait = StdDuration::try_from(delay).unwrap_or(StdDuration::ZERO);

        tokio::spawn(async move {
            tokio::time::sleep(wait).await;

            // Drop the registry entry before running: once due, the job can
            // no longer be cancelled, so an in-flight delivery is never
            // interrupted.
            let key = match kind {
                RoomEventKind::RoomStart => room_id.clone(),
                RoomEventKind::RoomReminder => reminder_key(&room_id),
            };
            scheduler.jobs.lock().await.remove(&key);

            scheduler.fire(&room_id, kind).await;
        })
    }

    /// Job body. Re-reads the room so the participant list reflects
    /// registrations made after scheduling. A room that no longer exists
    /// is logged and skipped.
    async fn fire(&self, room_id: &str, kind: RoomEventKind) {
        tracing::info!(room = %room_id, kind = kind.as_str(), "scheduled job fired");

        let room = match rooms::fetch_room(&self.db_pool, room_id).await {
            Ok(Some(room)) => room,
            Ok(None) => {
                tracing::warn!(room = %room_id, "room not found when its scheduled job fired");
                return;
            }
            Err(err) => {
                tracing::error!(room = %room_id, "failed to load room for scheduled job: {err:#}");
                return;
            }
        };

        let sender = room.owner.clone();
        notify::notify_participants(self.notifier.as_ref(), &room, kind, &sender).await;
    }

    /// Cancels the start and reminder jobs for a room if any are
    /// registered. Safe to call when nothing is scheduled.
    pub async fn cancel_room_start(&self, room_id: &str) {
        let mut jobs = self.jobs.lock().await;
        if let Some(handle) = jobs.remove(room_id) {
            handle.abort();
            tracing::debug!(room = %room_id, "start job cancelled");
        }
        if let Some(handle) = jobs.remove(&reminder_key(room_id)) {
            handle.abort();
            tracing::debug!(room = %room_id, "reminder job cancelled");
        }
    }

    /// Startup recovery: jobs live only in memory, so every room whose
    /// start time is still ahead is rescheduled from the database.
    pub async fn schedule_all_future_rooms(self: &Arc<Self>) {
        let rooms = match rooms::fetch_rooms_starting_after(
            &self.db_pool,
            OffsetDateTime::now_utc(),
        )
        .await
        {
            Ok(rooms) => rooms,
            Err(err) => {
                tracing::error!("failed to load future rooms for scheduling: {err:#}");
                return;
            }
        };

        tracing::info!(count = rooms.len(), "scheduling future rooms");
        for room in &rooms {
            self.schedule_room_start(room).await;
        }
    }

    /// Number of live registry entries, across all rooms.
    pub async fn live_jobs(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_scheduled(&self, room_id: &str) -> bool {
        self.jobs.lock().await.contains_key(room_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RoomEvent;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    static DB_COUNTER: AtomicU64 = AtomicU64::new(0);

    struct RecordingNotifier {
        events: StdMutex<Vec<(String, RoomEvent)>>,
    }

    impl RecordingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self { events: StdMutex::new(Vec::new()) })
        }

        fn events(&self) -> Vec<(String, RoomEvent)> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, recipient: &str, event: RoomEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push((recipient.to_owned(), event));
            Ok(())
        }
    }

    async fn pool() -> SqlitePool {
        // Under `start_paused`, tokio auto-advances the clock while the main
        // task is parked, which races the sqlx acquire-timeout ahead of the
        // connection actually establishing (PoolTimedOut). Resume the clock for
        // the duration of setup, then restore the paused state the tests expect.
        tokio::time::resume();
        // A shared-cache in-memory database (unique name per pool) lets every
        // pooled connection see the same data, so the pool can be fully
        // pre-warmed below. With all connections established up front and
        // `test_before_acquire` off, acquires complete on the first poll and
        // never arm the acquire-timeout that the paused clock would fire early.
        let n = DB_COUNTER.fetch_add(1, Ordering::Relaxed);
        let url = format!("sqlite:file:sched_test_{n}?mode=memory&cache=shared");
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .min_connections(8)
            .test_before_acquire(false)
            .connect(&url)
            .await
            .unwrap();
        crate::db::init(&pool).await.unwrap();
        tokio::time::pause();
        pool
    }

    async fn insert_room(
        pool: &SqlitePool,
        id: &str,
        start_time: Option<OffsetDateTime>,
        participants: &[&str],
    ) -> Room {
        let now = OffsetDateTime::now_utc();
        sqlx::query(
            "INSERT INTO rooms (id, category, theme, duration, start_time, kind, is_sponsored, owner, max_participants, created_at, updated_at)
             VALUES (?,?,?,?,?,?,0,?,10,?,?)",
        )
        .bind(id)
        .bind("cat")
        .bind("theme")
        .bind(60_i64)
        .bind(start_time)
        .bind("public")
        .bind("owner")
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();

        for user in participants {
            sqlx::query("INSERT INTO room_participants (room_id, user_id, joined_at) VALUES (?,?,?)")
                .bind(id)
                .bind(user)
                .bind(now)
                .execute(pool)
                .await
                .unwrap();
        }

        rooms::fetch_room(pool, id).await.unwrap().unwrap()
    }

    /// Spins without advancing the paused clock until the notifier has
    /// recorded `count` events; the job bodies do real database I/O on a
    /// separate thread, so completion is not instant.
    async fn wait_for_events(notifier: &RecordingNotifier, count: usize) {
        for _ in 0..200_000 {
            if notifier.events().len() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("timed out waiting for {count} events, got {}", notifier.events().len());
    }

    #[tokio::test(start_paused = true)]
    async fn reminder_fires_before_start() {
        let pool = pool().await;
        let notifier = RecordingNotifier::new();
        let scheduler = RoomScheduler::new(pool.clone(), notifier.clone());

        let start = OffsetDateTime::now_utc() + time::Duration::minutes(10);
        let room = insert_room(&pool, "room-1", Some(start), &["alice", "bob"]).await;

        scheduler.schedule_room_start(&room).await;
        assert_eq!(scheduler.live_jobs().await, 2);

        // Just past the reminder time: only reminder events, one per
        // participant present at fire time.
        tokio::time::sleep(StdDuration::from_secs(5 * 60 + 1)).await;
        wait_for_events(&notifier, 2).await;

        let events = notifier.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|(_, e)| e.kind == RoomEventKind::RoomReminder));
        assert!(events.iter().all(|(_, e)| e.sender == "owner" && e.room_id == "room-1"));

        tokio::time::sleep(StdDuration::from_secs(5 * 60)).await;
        wait_for_events(&notifier, 4).await;

        let events = notifier.events();
        assert_eq!(events.len(), 4);
        assert!(events[2..].iter().all(|(_, e)| e.kind == RoomEventKind::RoomStart));

        // Both jobs removed their registry entries.
        wait_until_empty(&scheduler).await;
    }

    async fn wait_until_empty(scheduler: &RoomScheduler) {
        for _ in 0..200_000 {
            if scheduler.live_jobs().await == 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("registry never drained, {} jobs left", scheduler.live_jobs().await);
    }

    #[tokio::test(start_paused = true)]
    async fn participants_are_read_at_fire_time() {
        let pool = pool().await;
        let notifier = RecordingNotifier::new();
        let scheduler = RoomScheduler::new(pool.clone(), notifier.clone());

        let start = OffsetDateTime::now_utc() + time::Duration::minutes(2);
        let room = insert_room(&pool, "room-1", Some(start), &[]).await;
        scheduler.schedule_room_start(&room).await;

        // Registered after scheduling, present at fire time.
        sqlx::query("INSERT INTO room_participants (room_id, user_id, joined_at) VALUES ('room-1','carol',?)")
            .bind(OffsetDateTime::now_utc())
            .execute(&pool)
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_secs(2 * 60 + 1)).await;
        wait_for_events(&notifier, 1).await;

        let events = notifier.events();
        assert_eq!(events[0].0, "carol");
        assert_eq!(events[0].1.kind, RoomEventKind::RoomStart);
    }

    #[tokio::test(start_paused = true)]
    async fn double_schedule_fires_once() {
        let pool = pool().await;
        let notifier = RecordingNotifier::new();
        let scheduler = RoomScheduler::new(pool.clone(), notifier.clone());

        let start = OffsetDateTime::now_utc() + time::Duration::minutes(10);
        let room = insert_room(&pool, "room-1", Some(start), &["alice"]).await;

        scheduler.schedule_room_start(&room).await;
        scheduler.schedule_room_start(&room).await;
        assert_eq!(scheduler.live_jobs().await, 2);

        tokio::time::sleep(StdDuration::from_secs(11 * 60)).await;
        wait_for_events(&notifier, 2).await;

        // One reminder, one start — no duplicates from the first schedule.
        let events = notifier.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1.kind, RoomEventKind::RoomReminder);
        assert_eq!(events[1].1.kind, RoomEventKind::RoomStart);
    }

    #[tokio::test(start_paused = true)]
    async fn past_reminder_still_schedules_start() {
        let pool = pool().await;
        let notifier = RecordingNotifier::new();
        let scheduler = RoomScheduler::new(pool.clone(), notifier.clone());

        // Start in 2 minutes — the reminder slot (start - 5min) is already
        // gone, the start job must still be registered.
        let start = OffsetDateTime::now_utc() + time::Duration::minutes(2);
        let room = insert_room(&pool, "room-1", Some(start), &["alice"]).await;

        scheduler.schedule_room_start(&room).await;
        assert_eq!(scheduler.live_jobs().await, 1);
        assert!(scheduler.is_scheduled("room-1").await);

        tokio::time::sleep(StdDuration::from_secs(2 * 60 + 1)).await;
        wait_for_events(&notifier, 1).await;
        assert_eq!(notifier.events()[0].1.kind, RoomEventKind::RoomStart);
    }

    #[tokio::test(start_paused = true)]
    async fn past_start_time_schedules_nothing() {
        let pool = pool().await;
        let notifier = RecordingNotifier::new();
        let scheduler = RoomScheduler::new(pool.clone(), notifier.clone());

        let start = OffsetDateTime::now_utc() - time::Duration::minutes(1);
        let room = insert_room(&pool, "room-1", Some(start), &["alice"]).await;

        scheduler.schedule_room_start(&room).await;
        assert_eq!(scheduler.live_jobs().await, 0);

        tokio::time::sleep(StdDuration::from_secs(30 * 60)).await;
        assert!(notifier.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_start_time_schedules_nothing() {
        let pool = pool().await;
        let notifier = RecordingNotifier::new();
        let scheduler = RoomScheduler::new(pool.clone(), notifier.clone());

        let room = insert_room(&pool, "room-1", None, &["alice"]).await;
        scheduler.schedule_room_start(&room).await;
        assert_eq!(scheduler.live_jobs().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let pool = pool().await;
        let notifier = RecordingNotifier::new();
        let scheduler = RoomScheduler::new(pool.clone(), notifier.clone());

        // Nothing scheduled: still fine.
        scheduler.cancel_room_start("room-1").await;

        let start = OffsetDateTime::now_utc() + time::Duration::minutes(10);
        let room = insert_room(&pool, "room-1", Some(start), &["alice"]).await;
        scheduler.schedule_room_start(&room).await;

        scheduler.cancel_room_start("room-1").await;
        scheduler.cancel_room_start("room-1").await;
        assert_eq!(scheduler.live_jobs().await, 0);

        tokio::time::sleep(StdDuration::from_secs(11 * 60)).await;
        assert!(notifier.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_moves_the_fire_time() {
        let pool = pool().await;
        let notifier = RecordingNotifier::new();
        let scheduler = RoomScheduler::new(pool.clone(), notifier.clone());

        let first = OffsetDateTime::now_utc() + time::Duration::hours(1);
        let mut room = insert_room(&pool, "room-1", Some(first), &["alice"]).await;
        scheduler.schedule_room_start(&room).await;

        // Owner pushes the room back an hour.
        let second = OffsetDateTime::now_utc() + time::Duration::hours(2);
        sqlx::query("UPDATE rooms SET start_time=? WHERE id='room-1'")
            .bind(second)
            .execute(&pool)
            .await
            .unwrap();
        room.start_time = Some(second);
        scheduler.schedule_room_start(&room).await;
        assert_eq!(scheduler.live_jobs().await, 2);

        // The old fire time passes without anything firing.
        tokio::time::sleep(StdDuration::from_secs(61 * 60)).await;
        for _ in 0..1000 {
            tokio::task::yield_now().await;
        }
        assert!(notifier.events().is_empty());

        // New reminder (start - 5min) and start both fire.
        tokio::time::sleep(StdDuration::from_secs(60 * 60)).await;
        wait_for_events(&notifier, 2).await;
        let events = notifier.events();
        assert_eq!(events[0].1.kind, RoomEventKind::RoomReminder);
        assert_eq!(events[1].1.kind, RoomEventKind::RoomStart);
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_room_fires_without_events() {
        let pool = pool().await;
        let notifier = RecordingNotifier::new();
        let scheduler = RoomScheduler::new(pool.clone(), notifier.clone());

        let start = OffsetDateTime::now_utc() + time::Duration::minutes(2);
        let room = insert_room(&pool, "room-1", Some(start), &["alice"]).await;
        scheduler.schedule_room_start(&room).await;

        sqlx::query("DELETE FROM rooms WHERE id='room-1'")
            .execute(&pool)
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_secs(2 * 60 + 1)).await;
        wait_until_empty(&scheduler).await;
        assert!(notifier.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_all_future_rooms_skips_past_rooms() {
        let pool = pool().await;
        let notifier = RecordingNotifier::new();
        let scheduler = RoomScheduler::new(pool.clone(), notifier.clone());

        let now = OffsetDateTime::now_utc();
        insert_room(&pool, "future-1", Some(now + time::Duration::minutes(30)), &[]).await;
        insert_room(&pool, "future-2", Some(now + time::Duration::hours(3)), &[]).await;
        insert_room(&pool, "past", Some(now - time::Duration::minutes(30)), &[]).await;
        insert_room(&pool, "unscheduled", None, &[]).await;

        scheduler.schedule_all_future_rooms().await;

        // Two start jobs plus two reminder jobs.
        assert_eq!(scheduler.live_jobs().await, 4);
        assert!(scheduler.is_scheduled("future-1").await);
        assert!(scheduler.is_scheduled("future-2").await);
        assert!(!scheduler.is_scheduled("past").await);
        assert!(!scheduler.is_scheduled("unscheduled").await);
    }
}
