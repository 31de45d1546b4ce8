//! Fixed total order over stages, one table per pipeline variant.
//!
//! A stage's rank decides what "upstream" means for `last_written` and which
//! stages a full run walks through. Only stages that write a new version of
//! the data can be a data location; the others (column or project selection,
//! index and restriction inference) only record parameters. Tables are static
//! and never mutated.

use super::stage::{ProjectKind, StageId};

/// One row of a [`ModuleOrder`] table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderEntry {
    pub stage: StageId,
    pub rank: usize,
    pub participates_in_full_run: bool,
    pub writes_data: bool,
}

const fn entry(
    stage: StageId,
    rank: usize,
    participates_in_full_run: bool,
    writes_data: bool,
) -> OrderEntry {
    OrderEntry {
        stage,
        rank,
        participates_in_full_run,
        writes_data,
    }
}

const NORMALIZE_ORDER: &[OrderEntry] = &[
    entry(StageId::Init, 0, false, true),
    entry(StageId::AddSelectedColumns, 1, false, false),
    entry(StageId::ReplaceMvs, 2, true, true),
    entry(StageId::RecodeTypes, 3, true, true),
    entry(StageId::ConcatWithInit, 4, true, true),
];

const LINK_ORDER: &[OrderEntry] = &[
    entry(StageId::Init, 0, false, true),
    entry(StageId::AddSelectedProject, 1, false, false),
    entry(StageId::CreateEsIndex, 2, true, false),
    entry(StageId::CreateEsLabeller, 3, false, false),
    entry(StageId::InferRestriction, 4, false, false),
    entry(StageId::PerformRestriction, 5, true, true),
    entry(StageId::EsLinker, 6, true, true),
    entry(StageId::LinkResultsAnalyzer, 7, true, false),
];

/// Read-only stage order for one [`ProjectKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleOrder {
    kind: ProjectKind,
    entries: &'static [OrderEntry],
}

impl ModuleOrder {
    pub fn for_kind(kind: ProjectKind) -> Self {
        let entries = match kind {
            ProjectKind::Normalize => NORMALIZE_ORDER,
            ProjectKind::Link => LINK_ORDER,
        };
        Self { kind, entries }
    }

    pub fn kind(&self) -> ProjectKind {
        self.kind
    }

    /// Rank of `stage`, or `None` if the stage is not part of this variant.
    pub fn rank(&self, stage: StageId) -> Option<usize> {
        self.get(stage).map(|e| e.rank)
    }

    pub fn participates_in_full_run(&self, stage: StageId) -> bool {
        self.get(stage)
            .map(|e| e.participates_in_full_run)
            .unwrap_or(false)
    }

    /// Whether `stage` stores a new version of the data at `(stage, file)`.
    pub fn writes_data(&self, stage: StageId) -> bool {
        self.get(stage).map(|e| e.writes_data).unwrap_or(false)
    }

    pub fn contains(&self, stage: StageId) -> bool {
        self.get(stage).is_some()
    }

    /// Stages in rank order.
    pub fn stages(&self) -> impl Iterator<Item = StageId> + '_ {
        self.entries.iter().map(|e| e.stage)
    }

    /// Stages that a full run executes, in rank order.
    pub fn full_run_stages(&self) -> impl Iterator<Item = StageId> + '_ {
        self.entries
            .iter()
            .filter(|e| e.participates_in_full_run)
            .map(|e| e.stage)
    }

    pub fn entries(&self) -> &'static [OrderEntry] {
        self.entries
    }

    fn get(&self, stage: StageId) -> Option<&OrderEntry> {
        self.entries.iter().find(|e| e.stage == stage)
    }
}
