//! The idempotent schema bootstrap sequence.
//!
//! lock → select namespace → ensure tables → seed → follow-ups → commit. Every
//! failure rolls the session back and surfaces unchanged; nothing is retried.

use std::fmt;

use async_trait::async_trait;
use licenses_kernel::{Namespace, Seed, TableDeclaration};
use tracing::{debug, error, info, warn};

use crate::engine::{Engine, ExistingObject, Session};
use crate::error::{BootstrapError, Result};

/// Progress of one bootstrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    NotStarted,
    ContextAcquired,
    NamespaceSelected,
    TablesEnsured,
    Committed,
    Failed,
}

impl BootstrapState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }
}

/// Everything one bootstrap call needs to know.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    pub namespace: Namespace,
    /// Declarations in creation order.
    pub tables: Vec<TableDeclaration>,
    pub seeds: Vec<Seed>,
    /// Create the namespace when the database does not have it yet.
    pub create_namespace: bool,
}

impl BootstrapPlan {
    pub fn new(namespace: Namespace, tables: Vec<TableDeclaration>) -> Self {
        Self {
            namespace,
            tables,
            seeds: Vec::new(),
            create_namespace: false,
        }
    }

    pub fn with_seeds(mut self, seeds: Vec<Seed>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn create_namespace(mut self, create: bool) -> Self {
        self.create_namespace = create;
        self
    }
}

/// Extra writes made inside the bootstrap transaction once every table exists
/// and the seeds are in place.
#[async_trait]
pub trait FollowUp<S: Session>: Send + Sync {
    /// Returns the number of rows written.
    async fn apply(&self, session: &mut S, namespace: &Namespace) -> Result<usize>;
}

/// Outcome of a committed bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub namespace: Namespace,
    pub namespace_created: bool,
    pub created: Vec<String>,
    pub existing: Vec<String>,
    pub seeded_rows: usize,
}

impl Report {
    fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            namespace_created: false,
            created: Vec::new(),
            existing: Vec::new(),
            seeded_rows: 0,
        }
    }

    /// True when the run changed nothing.
    pub fn is_noop(&self) -> bool {
        !self.namespace_created && self.created.is_empty() && self.seeded_rows == 0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "schema creation succeeded in namespace \"{}\": {} created, {} already present",
            self.namespace,
            self.created.len(),
            self.existing.len()
        )?;
        if self.seeded_rows > 0 {
            write!(f, ", {} seed rows inserted", self.seeded_rows)?;
        }
        Ok(())
    }
}

/// Runs a [`BootstrapPlan`] against an engine, tracking [`BootstrapState`].
pub struct Bootstrapper<'e, E: Engine> {
    engine: &'e E,
    state: BootstrapState,
}

impl<'e, E: Engine> Bootstrapper<'e, E> {
    pub fn new(engine: &'e E) -> Self {
        Self {
            engine,
            state: BootstrapState::NotStarted,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    pub async fn run(&mut self, plan: &BootstrapPlan) -> Result<Report> {
        self.run_with(plan, &[]).await
    }

    /// Run the plan, then `follow_ups` in order, in the same transaction.
    pub async fn run_with(
        &mut self,
        plan: &BootstrapPlan,
        follow_ups: &[&dyn FollowUp<E::Session>],
    ) -> Result<Report> {
        self.advance(BootstrapState::ContextAcquired);

        match self.execute(plan, follow_ups).await {
            Ok(report) => Ok(report),
            Err(err) => {
                error!(
                    namespace = %plan.namespace,
                    stage = ?self.state,
                    error = %err,
                    "schema bootstrap failed"
                );
                self.state = BootstrapState::Failed;
                Err(err)
            }
        }
    }

    async fn execute(
        &mut self,
        plan: &BootstrapPlan,
        follow_ups: &[&dyn FollowUp<E::Session>],
    ) -> Result<Report> {
        let mut session = self.engine.begin().await?;

        match self.apply(&mut session, plan, follow_ups).await {
            Ok(report) => {
                session.commit().await?;
                self.advance(BootstrapState::Committed);
                info!(
                    namespace = %report.namespace,
                    created = report.created.len(),
                    existing = report.existing.len(),
                    seeded = report.seeded_rows,
                    "schema bootstrap committed"
                );
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed bootstrap also failed");
                }
                Err(err)
            }
        }
    }

    async fn apply(
        &mut self,
        session: &mut E::Session,
        plan: &BootstrapPlan,
        follow_ups: &[&dyn FollowUp<E::Session>],
    ) -> Result<Report> {
        let namespace = &plan.namespace;
        let mut report = Report::new(namespace.clone());

        session.lock_namespace(namespace).await?;

        if !session.namespace_exists(namespace).await? {
            if !plan.create_namespace {
                return Err(BootstrapError::namespace(
                    namespace,
                    "namespace does not exist and automatic creation is disabled",
                ));
            }
            session.create_namespace(namespace).await?;
            report.namespace_created = true;
            info!(%namespace, "namespace created");
        }

        session.select_namespace(namespace).await?;
        self.advance(BootstrapState::NamespaceSelected);

        for table in &plan.tables {
            match session.describe(namespace, table.name).await? {
                None => {
                    session.create_table(table).await?;
                    info!(%namespace, table = table.name, "table created");
                    report.created.push(table.name.to_string());
                }
                Some(ExistingObject::Table(columns)) => {
                    let conflicts = table.conflicts(&columns);
                    if !conflicts.is_empty() {
                        return Err(BootstrapError::shape_conflict(
                            namespace,
                            table.name,
                            &conflicts,
                        ));
                    }
                    debug!(%namespace, table = table.name, "table already present");
                    report.existing.push(table.name.to_string());
                }
                Some(ExistingObject::Other { kind }) => {
                    return Err(BootstrapError::conflict(
                        namespace,
                        table.name,
                        format!("existing {kind} with this name is not a table"),
                    ));
                }
            }
        }
        self.advance(BootstrapState::TablesEnsured);

        for seed in &plan.seeds {
            for row in &seed.rows {
                if session.insert_seed_row(seed, row).await? {
                    report.seeded_rows += 1;
                }
            }
        }

        for follow_up in follow_ups {
            report.seeded_rows += follow_up.apply(session, namespace).await?;
        }

        Ok(report)
    }

    fn advance(&mut self, next: BootstrapState) {
        debug!(from = ?self.state, to = ?next, "bootstrap state transition");
        self.state = next;
    }
}
