/// Subsystems nominally paused while the switch is engaged.
///
/// Descriptive only: nothing here checks that a subsystem honored the freeze.
pub const DEFAULT_AFFECTED_SYSTEMS: &[&str] = &[
    "AI Chat",
    "Auto-Healing System",
    "Auto-Build System",
    "Project Management",
    "Telemetry Collection",
    "Developer Commit API",
    "Developer Deploy API",
    "Code Generation",
    "Auto-Fix System",
    "Suggestions Engine",
    "Code Review System",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffectedSystems(Vec<String>);

impl Default for AffectedSystems {
    fn default() -> Self {
        Self(DEFAULT_AFFECTED_SYSTEMS.iter().map(|s| s.to_string()).collect())
    }
}

impl AffectedSystems {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    /// The catalog while engaged, nothing otherwise.
    pub fn for_engaged(&self, engaged: bool) -> Vec<String> {
        if engaged {
            self.0.clone()
        } else {
            Vec::new()
        }
    }
}
