//! Field interventions
//!
//! One intervention is what an operator records at a bait station: how much
//! bait was consumed, which traces of activity were seen, and free-text
//! notes. This module declares the `interventions` table and offers a typed
//! view over its records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::error::{StoreError, StoreResult};
use crate::model::Record;
use crate::query::Predicate;
use crate::schema::{ColumnDef, SchemaRegistry, TableDef};
use crate::store::Store;

pub const TABLE: &str = "interventions";
pub const SCHEMA_VERSION: u32 = 1;

/// Consumption is recorded in quarter steps
pub const CONSUMPTION_STEP: u8 = 25;
pub const CONSUMPTION_MAX: u8 = 100;

const STATION_ID: &str = "station_id";
const CONSUMPTION: &str = "consumption";
const NOTES: &str = "notes";
const TRACE_DROPPINGS: &str = "trace_droppings";
const TRACE_TRACKS: &str = "trace_tracks";
const TRACE_DAMAGE: &str = "trace_damage";
const TRACE_NEST: &str = "trace_nest";
const TRACE_SMELL: &str = "trace_smell";

/// Declare the `interventions` table
pub fn declare(registry: &SchemaRegistry) -> StoreResult<Arc<TableDef>> {
    registry.declare_table(
        TABLE,
        SCHEMA_VERSION,
        vec![
            ColumnDef::string(STATION_ID),
            ColumnDef::number(CONSUMPTION),
            ColumnDef::string(NOTES).optional(),
            ColumnDef::boolean(TRACE_DROPPINGS).with_default(false),
            ColumnDef::boolean(TRACE_TRACKS).with_default(false),
            ColumnDef::boolean(TRACE_DAMAGE).with_default(false),
            ColumnDef::boolean(TRACE_NEST).with_default(false),
            ColumnDef::boolean(TRACE_SMELL).with_default(false),
        ],
    )
}

/// Registry with every table this crate knows about
pub fn registry() -> StoreResult<Arc<SchemaRegistry>> {
    let registry = SchemaRegistry::new();
    declare(&registry)?;
    Ok(Arc::new(registry))
}

/// Signs of rodent activity seen at the station
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traces {
    pub droppings: bool,
    pub tracks: bool,
    pub damage: bool,
    pub nest: bool,
    pub smell: bool,
}

impl Traces {
    pub fn any(&self) -> bool {
        self.droppings || self.tracks || self.damage || self.nest || self.smell
    }

    /// Parse a comma-separated list such as `droppings,nest`
    pub fn parse(list: &str) -> StoreResult<Self> {
        let mut traces = Traces::default();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match name {
                "droppings" => traces.droppings = true,
                "tracks" => traces.tracks = true,
                "damage" => traces.damage = true,
                "nest" => traces.nest = true,
                "smell" => traces.smell = true,
                other => {
                    return Err(StoreError::validation(
                        TABLE,
                        format!("unknown trace '{}'", other),
                    ))
                }
            }
        }
        Ok(traces)
    }
}

/// Input for a new intervention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionDraft {
    pub station_id: String,
    /// Percentage of bait consumed
    pub consumption: u8,
    pub notes: Option<String>,
    pub traces: Traces,
}

impl InterventionDraft {
    pub fn new(station_id: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            consumption: 0,
            notes: None,
            traces: Traces::default(),
        }
    }

    pub fn consumption(mut self, percent: u8) -> Self {
        self.consumption = percent;
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn traces(mut self, traces: Traces) -> Self {
        self.traces = traces;
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.station_id.trim().is_empty() {
            return Err(StoreError::validation(TABLE, "station_id must not be empty"));
        }
        check_consumption(self.consumption)
    }

    /// Write the draft into a staged record
    fn apply(&self, record: &mut Record) -> StoreResult<()> {
        record.set(STATION_ID, self.station_id.as_str())?;
        record.set(CONSUMPTION, u32::from(self.consumption))?;
        let notes = self
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        record.set(NOTES, notes)?;
        record.set(TRACE_DROPPINGS, self.traces.droppings)?;
        record.set(TRACE_TRACKS, self.traces.tracks)?;
        record.set(TRACE_DAMAGE, self.traces.damage)?;
        record.set(TRACE_NEST, self.traces.nest)?;
        record.set(TRACE_SMELL, self.traces.smell)
    }
}

fn check_consumption(percent: u8) -> StoreResult<()> {
    if percent > CONSUMPTION_MAX || percent % CONSUMPTION_STEP != 0 {
        return Err(StoreError::validation(
            TABLE,
            format!(
                "consumption must be 0..={} in steps of {}, got {}",
                CONSUMPTION_MAX, CONSUMPTION_STEP, percent
            ),
        ));
    }
    Ok(())
}

/// A committed intervention
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intervention {
    pub id: String,
    pub station_id: String,
    pub consumption: u8,
    pub notes: Option<String>,
    pub traces: Traces,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
}

impl TryFrom<&Record> for Intervention {
    type Error = StoreError;

    fn try_from(record: &Record) -> StoreResult<Self> {
        if record.table_name() != TABLE {
            return Err(StoreError::validation(
                TABLE,
                format!("record belongs to '{}'", record.table_name()),
            ));
        }

        let consumption = record.get_number(CONSUMPTION)?.unwrap_or(0.0);
        if !(0.0..=f64::from(CONSUMPTION_MAX)).contains(&consumption) || consumption.fract() != 0.0
        {
            return Err(StoreError::validation(
                TABLE,
                format!("stored consumption {} out of range", consumption),
            ));
        }

        let flag = |column: &str| -> StoreResult<bool> {
            Ok(record.get_bool(column)?.unwrap_or(false))
        };

        Ok(Intervention {
            id: record.id().to_string(),
            station_id: record.get_str(STATION_ID)?.unwrap_or_default(),
            consumption: consumption as u8,
            notes: record.get_str(NOTES)?,
            traces: Traces {
                droppings: flag(TRACE_DROPPINGS)?,
                tracks: flag(TRACE_TRACKS)?,
                damage: flag(TRACE_DAMAGE)?,
                nest: flag(TRACE_NEST)?,
                smell: flag(TRACE_SMELL)?,
            },
            created_at: record.created_at(),
            updated_at: record.updated_at(),
        })
    }
}

/// Record one intervention in its own unit of work
pub fn record(store: &Store, draft: &InterventionDraft) -> StoreResult<Intervention> {
    draft.validate()?;
    let created = store.write("record intervention", |txn| {
        txn.create(TABLE, |r| draft.apply(r))
    })?;
    Intervention::try_from(&created)
}

pub fn find(store: &Store, id: &str) -> StoreResult<Intervention> {
    Intervention::try_from(&store.find(TABLE, id)?)
}

/// Every intervention, in identifier order
pub fn all(store: &Store) -> StoreResult<Vec<Intervention>> {
    list(store, Predicate::All)
}

/// Interventions at one station, in identifier order
pub fn for_station(store: &Store, station_id: &str) -> StoreResult<Vec<Intervention>> {
    list(store, Predicate::eq(STATION_ID, station_id))
}

fn list(store: &Store, predicate: Predicate) -> StoreResult<Vec<Intervention>> {
    store
        .query(TABLE, predicate)?
        .map(|record| Intervention::try_from(&record))
        .collect()
}

/// Delete one intervention; its identifier is never reused
pub fn delete(store: &Store, id: &str) -> StoreResult<()> {
    let record = store.find(TABLE, id)?;
    store.write("delete intervention", |txn| txn.delete(&record))
}
