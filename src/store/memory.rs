use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::wal::Wal;

use super::{
    APPOINTMENT_SLOT_KEY, PROFESSIONAL_EMAIL_KEY, PROFESSIONAL_PHONE_KEY, Store, StoreError,
};

/// Everything owned by one professional. One lock guards the whole calendar.
#[derive(Debug, Clone)]
pub struct ProfessionalState {
    pub profile: Professional,
    pub clients: Vec<Client>,
    /// Creation order.
    pub rules: Vec<RecurringRule>,
    /// Sorted by `(day_of_week, start)`.
    pub schedule: Vec<AvailabilityBlock>,
    /// The key is the `(date, start)` uniqueness constraint.
    pub appointments: BTreeMap<(NaiveDate, Clock), Appointment>,
}

impl ProfessionalState {
    fn new(profile: Professional) -> Self {
        Self {
            profile,
            clients: Vec::new(),
            rules: Vec::new(),
            schedule: Vec::new(),
            appointments: BTreeMap::new(),
        }
    }

    fn day(&self, date: NaiveDate) -> impl Iterator<Item = &Appointment> {
        self.appointments
            .range((date, Clock::MIDNIGHT)..=(date, Clock::LAST))
            .map(|(_, a)| a)
    }
}

pub type SharedProfessionalState = Arc<RwLock<ProfessionalState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// written together and share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stray buffered bytes cannot leak into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// In-memory relational store made durable by a write-ahead log.
///
/// Writes take the owning professional's write lock, check constraints,
/// append to the WAL, then apply. A failed append leaves state untouched.
pub struct WalStore {
    state: DashMap<Ulid, SharedProfessionalState>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// client id → professional id
    client_owner: DashMap<Ulid, Ulid>,
    /// rule id → professional id
    rule_owner: DashMap<Ulid, Ulid>,
    /// Normalized email / phone → professional id.
    contacts: DashMap<String, Ulid>,
    /// Writers share it; compaction takes it exclusively so no write lands
    /// between the snapshot and the file swap.
    write_gate: RwLock<()>,
}

fn email_key(email: &str) -> String {
    format!("email:{}", email.trim().to_lowercase())
}

fn phone_key(phone: &str) -> String {
    format!("phone:{}", phone.trim())
}

/// Apply a non-registration event to its professional's state (caller holds the lock).
fn apply_to_professional(
    ps: &mut ProfessionalState,
    event: &Event,
    client_owner: &DashMap<Ulid, Ulid>,
    rule_owner: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::ClientRegistered(client) => {
            client_owner.insert(client.id, client.professional_id);
            ps.clients.push(client.clone());
        }
        Event::RuleCreated(rule) => {
            rule_owner.insert(rule.id, rule.professional_id);
            ps.rules.push(rule.clone());
        }
        Event::AppointmentBooked(appt) => {
            ps.appointments.insert((appt.date, appt.start), appt.clone());
        }
        Event::ScheduleReplaced { blocks, .. } => {
            let mut blocks = blocks.clone();
            blocks.sort_by_key(|b| (b.day_of_week, b.start));
            ps.schedule = blocks;
        }
        // Registration creates the state itself; handled at the map level.
        Event::ProfessionalRegistered(_) => {}
    }
}

impl WalStore {
    /// Replay the WAL at `path` and start its background writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.torn_tail {
            warn!(path = %wal_path.display(), "discarded torn record at WAL tail");
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            state: DashMap::new(),
            wal_tx,
            client_owner: DashMap::new(),
            rule_owner: DashMap::new(),
            contacts: DashMap::new(),
            write_gate: RwLock::new(()),
        };

        // Sole owner of every Arc during replay, so try_write always succeeds.
        // Never block here: this may run inside an async context (lazy tenant creation).
        let mut orphans = 0usize;
        for event in &replay.events {
            match event {
                Event::ProfessionalRegistered(p) => store.register_in_memory(p.clone()),
                other => {
                    let applied = store
                        .state
                        .get(&other.professional_id())
                        .map(|entry| entry.value().clone())
                        .and_then(|ps| {
                            let mut guard = ps.try_write().ok()?;
                            apply_to_professional(
                                &mut guard,
                                other,
                                &store.client_owner,
                                &store.rule_owner,
                            );
                            Some(())
                        });
                    if applied.is_none() {
                        orphans += 1;
                    }
                }
            }
        }
        if orphans > 0 {
            warn!(orphans, "WAL records referenced unknown professionals and were skipped");
        }
        info!(
            path = %wal_path.display(),
            events = replay.events.len(),
            professionals = store.state.len(),
            "store replayed"
        );
        Ok(store)
    }

    fn register_in_memory(&self, p: Professional) {
        self.contacts.insert(email_key(&p.email), p.id);
        if let Some(phone) = &p.phone {
            self.contacts.insert(phone_key(phone), p.id);
        }
        self.state
            .insert(p.id, Arc::new(RwLock::new(ProfessionalState::new(p))));
    }

    fn get_professional(&self, id: &Ulid) -> Option<SharedProfessionalState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// Claim a unique contact key for `id`, or report the constraint it violates.
    fn reserve_contact(&self, key: String, id: Ulid, constraint: &'static str) -> Result<(), StoreError> {
        match self.contacts.entry(key) {
            Entry::Occupied(_) => Err(StoreError::UniqueViolation(constraint)),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    async fn persist_and_apply(
        &self,
        ps: &mut ProfessionalState,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_professional(ps, event, &self.client_owner, &self.rule_owner);
        Ok(())
    }

    /// Owning professional's state, write-locked.
    async fn write_professional(
        &self,
        id: Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ProfessionalState>, StoreError> {
        let ps = self
            .get_professional(&id)
            .ok_or(StoreError::ForeignKey("professionals", id))?;
        Ok(ps.write_owned().await)
    }

    /// The client must exist and belong to the professional.
    fn check_client(&self, professional_id: Ulid, client_id: Ulid) -> Result<(), StoreError> {
        match self.client_owner.get(&client_id) {
            Some(owner) if *owner.value() == professional_id => Ok(()),
            _ => Err(StoreError::ForeignKey("clients", client_id)),
        }
    }

    /// Rewrite the WAL with only the records needed to rebuild current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.write_gate.write().await;
        let shared: Vec<SharedProfessionalState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for ps in shared {
            let guard = ps.read().await;
            events.push(Event::ProfessionalRegistered(guard.profile.clone()));
            events.extend(guard.clients.iter().cloned().map(Event::ClientRegistered));
            events.extend(guard.rules.iter().cloned().map(Event::RuleCreated));
            events.extend(guard.appointments.values().cloned().map(Event::AppointmentBooked));
            if !guard.schedule.is_empty() {
                events.push(Event::ScheduleReplaced {
                    professional_id: guard.profile.id,
                    blocks: guard.schedule.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl Store for WalStore {
    async fn insert_professional(&self, draft: ProfessionalDraft) -> Result<Professional, StoreError> {
        let professional = Professional {
            id: Ulid::new(),
            name: draft.name,
            email: draft.email,
            phone: draft.phone,
            cancellation_window_hours: draft.cancellation_window_hours,
            created_at: now_ms(),
        };
        let id = professional.id;
        let email = email_key(&professional.email);
        let phone = professional.phone.as_deref().map(phone_key);
        let _gate = self.write_gate.read().await;

        self.reserve_contact(email.clone(), id, PROFESSIONAL_EMAIL_KEY)?;
        if let Some(phone) = &phone
            && let Err(e) = self.reserve_contact(phone.clone(), id, PROFESSIONAL_PHONE_KEY)
        {
            self.contacts.remove(&email);
            return Err(e);
        }

        let event = Event::ProfessionalRegistered(professional.clone());
        if let Err(e) = self.wal_append(&event).await {
            self.contacts.remove(&email);
            if let Some(phone) = &phone {
                self.contacts.remove(phone);
            }
            return Err(e);
        }
        self.state.insert(
            id,
            Arc::new(RwLock::new(ProfessionalState::new(professional.clone()))),
        );
        Ok(professional)
    }

    async fn professionals(&self) -> Result<Vec<Professional>, StoreError> {
        let shared: Vec<SharedProfessionalState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for ps in shared {
            out.push(ps.read().await.profile.clone());
        }
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    async fn insert_client(&self, draft: ClientDraft) -> Result<Client, StoreError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.write_professional(draft.professional_id).await?;
        let client = Client {
            id: Ulid::new(),
            professional_id: draft.professional_id,
            name: draft.name,
            email: draft.email,
            phone: draft.phone,
            created_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &Event::ClientRegistered(client.clone()))
            .await?;
        Ok(client)
    }

    async fn clients_of(&self, professional_id: Ulid) -> Result<Vec<Client>, StoreError> {
        let Some(ps) = self.get_professional(&professional_id) else {
            return Ok(vec![]);
        };
        Ok(ps.read().await.clients.clone())
    }

    async fn day_appointments(
        &self,
        professional_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, StoreError> {
        let Some(ps) = self.get_professional(&professional_id) else {
            return Ok(vec![]);
        };
        let guard = ps.read().await;
        Ok(guard.day(date).cloned().collect())
    }

    async fn appointments_in(
        &self,
        professional_id: Ulid,
        range: DateRange,
    ) -> Result<Vec<Appointment>, StoreError> {
        let Some(ps) = self.get_professional(&professional_id) else {
            return Ok(vec![]);
        };
        let guard = ps.read().await;
        Ok(guard
            .appointments
            .values()
            .filter(|a| range.contains(a.date))
            .cloned()
            .collect())
    }

    async fn insert_appointment(&self, draft: AppointmentDraft) -> Result<Appointment, StoreError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.write_professional(draft.professional_id).await?;
        self.check_client(draft.professional_id, draft.client_id)?;
        if let Provenance::Generated { rule_id } = draft.provenance
            && !self.rule_owner.contains_key(&rule_id)
        {
            return Err(StoreError::ForeignKey("recurring_rules", rule_id));
        }
        if guard.appointments.contains_key(&(draft.date, draft.start)) {
            return Err(StoreError::UniqueViolation(APPOINTMENT_SLOT_KEY));
        }
        let appointment = Appointment {
            id: Ulid::new(),
            professional_id: draft.professional_id,
            client_id: draft.client_id,
            date: draft.date,
            start: draft.start,
            duration_minutes: draft.duration_minutes,
            status: AppointmentStatus::Scheduled,
            price: draft.price,
            note: draft.note,
            provenance: draft.provenance,
            rescheduled_from: None,
            created_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &Event::AppointmentBooked(appointment.clone()))
            .await?;
        Ok(appointment)
    }

    async fn insert_rule(&self, draft: RuleDraft) -> Result<RecurringRule, StoreError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.write_professional(draft.professional_id).await?;
        self.check_client(draft.professional_id, draft.client_id)?;
        let rule = RecurringRule {
            id: Ulid::new(),
            professional_id: draft.professional_id,
            client_id: draft.client_id,
            day_of_week: draft.day_of_week,
            start: draft.start,
            duration_minutes: draft.duration_minutes,
            price: draft.price,
            activation_date: draft.activation_date,
            active: true,
            created_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &Event::RuleCreated(rule.clone()))
            .await?;
        Ok(rule)
    }

    async fn rule(&self, id: Ulid) -> Result<Option<RecurringRule>, StoreError> {
        let Some(owner) = self.rule_owner.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(ps) = self.get_professional(&owner) else {
            return Ok(None);
        };
        let guard = ps.read().await;
        Ok(guard.rules.iter().find(|r| r.id == id).cloned())
    }

    async fn rules_of(&self, professional_id: Ulid) -> Result<Vec<RecurringRule>, StoreError> {
        let Some(ps) = self.get_professional(&professional_id) else {
            return Ok(vec![]);
        };
        Ok(ps.read().await.rules.clone())
    }

    async fn replace_schedule(
        &self,
        professional_id: Ulid,
        blocks: Vec<AvailabilityBlock>,
    ) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        let mut guard = self.write_professional(professional_id).await?;
        let event = Event::ScheduleReplaced {
            professional_id,
            blocks,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    async fn schedule_of(&self, professional_id: Ulid) -> Result<Vec<AvailabilityBlock>, StoreError> {
        let Some(ps) = self.get_professional(&professional_id) else {
            return Ok(vec![]);
        };
        Ok(ps.read().await.schedule.clone())
    }
}
