//! Job registry - owns every job of a run and the dependency wiring between them.

use rollout_core::{Error, Job, JobDeclaration, JobIndex, JobKind, Result};
use std::collections::HashMap;
use tracing::debug;

/// Owner of all jobs for one run.
///
/// Jobs live in a single arena; the per-kind maps and the dependency lists of
/// deploy jobs refer to them by [`JobIndex`]. Nothing but job status changes
/// after construction.
#[derive(Debug)]
pub struct Registry {
    jobs: Vec<Job>,
    pulls: HashMap<String, JobIndex>,
    builds: HashMap<String, JobIndex>,
    deploys: HashMap<String, JobIndex>,
    /// Declaration order per kind.
    pull_order: Vec<JobIndex>,
    build_order: Vec<JobIndex>,
    deploy_order: Vec<JobIndex>,
    /// Deploy jobs without dependencies.
    roots: Vec<JobIndex>,
    /// Reverse edges, indexed like `jobs`.
    dependents: Vec<Vec<JobIndex>>,
}

impl Registry {
    /// Register declarations in order.
    ///
    /// A deploy job may only depend on deploy jobs declared before it, so the
    /// declaration order must already be a topological order. This also rules
    /// out cycles, including a job depending on itself.
    pub fn new<I>(declarations: I) -> Result<Self>
    where
        I: IntoIterator<Item = JobDeclaration>,
    {
        let mut registry = Self {
            jobs: Vec::new(),
            pulls: HashMap::new(),
            builds: HashMap::new(),
            deploys: HashMap::new(),
            pull_order: Vec::new(),
            build_order: Vec::new(),
            deploy_order: Vec::new(),
            roots: Vec::new(),
            dependents: Vec::new(),
        };

        for declaration in declarations {
            registry.register(declaration)?;
        }

        debug!(
            pulls = registry.pull_order.len(),
            builds = registry.build_order.len(),
            deploys = registry.deploy_order.len(),
            roots = registry.roots.len(),
            "Registry built"
        );
        Ok(registry)
    }

    fn register(&mut self, declaration: JobDeclaration) -> Result<()> {
        let kind = declaration.kind();
        if self.contains(kind, declaration.key()) {
            return Err(Error::DuplicateName {
                kind,
                name: declaration.key().to_string(),
            });
        }

        let index = JobIndex::new(self.jobs.len());
        match declaration {
            JobDeclaration::Pull { name, images } => {
                self.pulls.insert(name.clone(), index);
                self.pull_order.push(index);
                self.push(Job::pull(name, images));
            }
            JobDeclaration::Build { file, output, args } => {
                self.builds.insert(file.clone(), index);
                self.build_order.push(index);
                self.push(Job::build(file, output, args));
            }
            JobDeclaration::Deploy {
                file,
                depends_on,
                args,
            } => {
                let mut dependencies = Vec::with_capacity(depends_on.len());
                for name in &depends_on {
                    let dep = self.deploys.get(name).copied().ok_or_else(|| {
                        Error::UnresolvedDependency {
                            job: file.clone(),
                            dependency: name.clone(),
                        }
                    })?;
                    if !dependencies.contains(&dep) {
                        dependencies.push(dep);
                    }
                }

                for dep in &dependencies {
                    self.dependents[dep.get()].push(index);
                }
                if dependencies.is_empty() {
                    self.roots.push(index);
                }
                self.deploys.insert(file.clone(), index);
                self.deploy_order.push(index);
                self.push(Job::deploy(file, depends_on, dependencies, args));
            }
        }
        Ok(())
    }

    fn push(&mut self, job: Job) {
        self.jobs.push(job);
        self.dependents.push(Vec::new());
    }

    fn map(&self, kind: JobKind) -> &HashMap<String, JobIndex> {
        match kind {
            JobKind::Pull => &self.pulls,
            JobKind::Build => &self.builds,
            JobKind::Deploy => &self.deploys,
        }
    }

    pub fn contains(&self, kind: JobKind, key: &str) -> bool {
        self.map(kind).contains_key(key)
    }

    pub fn index_of(&self, kind: JobKind, key: &str) -> Option<JobIndex> {
        self.map(kind).get(key).copied()
    }

    pub fn get(&self, kind: JobKind, key: &str) -> Option<&Job> {
        self.index_of(kind, key).map(|index| self.job(index))
    }

    /// Look up a job by index. Indices handed out by this registry are always valid.
    pub fn job(&self, index: JobIndex) -> &Job {
        &self.jobs[index.get()]
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn pulls(&self) -> &[JobIndex] {
        &self.pull_order
    }

    pub fn builds(&self) -> &[JobIndex] {
        &self.build_order
    }

    pub fn deploys(&self) -> &[JobIndex] {
        &self.deploy_order
    }

    /// Deploy jobs declared without dependencies.
    pub fn roots(&self) -> &[JobIndex] {
        &self.roots
    }

    /// Deploy jobs that declared a dependency on `index`.
    pub fn dependents(&self, index: JobIndex) -> &[JobIndex] {
        &self.dependents[index.get()]
    }

    /// Group jobs into levels: every job in level `n` only depends on jobs in
    /// earlier levels. Pull, build and root deploy jobs form level 0.
    pub fn levels(&self) -> Vec<Vec<JobIndex>> {
        let mut depth = vec![0usize; self.jobs.len()];
        // Deploy order is topological, so dependencies are settled first.
        for &index in &self.deploy_order {
            depth[index.get()] = self
                .job(index)
                .dependencies()
                .iter()
                .map(|dep| depth[dep.get()] + 1)
                .max()
                .unwrap_or(0);
        }

        let height = depth.iter().copied().max().map_or(0, |d| d + 1);
        let mut levels = vec![Vec::new(); height];
        let ordered = self
            .pull_order
            .iter()
            .chain(&self.build_order)
            .chain(&self.deploy_order);
        for &index in ordered {
            levels[depth[index.get()]].push(index);
        }
        levels
    }
}
