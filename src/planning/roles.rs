//! Role capability table used by the graph builder.
//!
//! Roles are data, not code: each entry names the keywords that select
//! it, the roles it must run after, a prompt template, and whether it
//! may be pruned when a graph exceeds the node budget.

use serde::{Deserialize, Serialize};

/// Name of the fallback role used when no keyword matches a request.
pub const DEFAULT_ROLE: &str = "generalist";

/// A single role a task can be generated for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSpec {
    /// Role name, unique within the table.
    pub name: String,
    /// Request keywords that select this role.
    pub keywords: Vec<String>,
    /// Roles whose tasks must complete before this role's task starts.
    pub depends_on: Vec<String>,
    /// Short title for the generated task.
    pub title: String,
    /// Prompt template; `{request}` and `{context}` are substituted.
    pub prompt_template: String,
    /// Optional roles are pruned first when a graph is over budget.
    pub optional: bool,
    /// Pruning order among optional roles (higher is pruned first).
    pub prune_rank: u32,
    /// Dispatch priority (lower runs first among ready tasks).
    pub priority: u32,
}

impl RoleSpec {
    /// Check whether any of this role's keywords appears in the request.
    ///
    /// A keyword only counts when it starts at a word boundary, so "ui"
    /// does not fire inside "build". Trailing characters are allowed,
    /// which keeps "tests" matching "test" and "documentation" matching
    /// "document".
    pub fn matches(&self, request_lower: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| keyword_at_word_start(request_lower, k))
    }
}

fn keyword_at_word_start(text: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    let mut from = 0;
    while let Some(offset) = text[from..].find(keyword) {
        let at = from + offset;
        let preceded_by_word = text[..at]
            .chars()
            .next_back()
            .map_or(false, |c| c.is_alphanumeric());
        if !preceded_by_word {
            return true;
        }
        from = at + keyword.len();
    }
    false
}

/// Ordered table of known roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleTable {
    roles: Vec<RoleSpec>,
}

impl RoleTable {
    pub fn new(roles: Vec<RoleSpec>) -> Self {
        Self { roles }
    }

    /// The built-in roster covering the common software delivery roles.
    pub fn default_roster() -> Self {
        let role = |name: &str,
                    keywords: &[&str],
                    depends_on: &[&str],
                    title: &str,
                    template: &str,
                    optional: bool,
                    prune_rank: u32,
                    priority: u32| RoleSpec {
            name: name.to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            title: title.to_string(),
            prompt_template: template.to_string(),
            optional,
            prune_rank,
            priority,
        };

        Self::new(vec![
            role(
                "architect",
                &["design", "architecture", "plan", "structure", "schema"],
                &[],
                "Design the solution",
                "You are the architect. Produce a design for the following request.\n\nRequest: {request}\n{context}\nList your key decisions under a '## Decisions' heading.",
                false,
                0,
                0,
            ),
            role(
                "backend",
                &["api", "backend", "server", "endpoint", "service", "route"],
                &["architect"],
                "Implement the backend",
                "You are the backend engineer. Implement the server-side work for this request.\n\nRequest: {request}\n{context}\nReport each file you touch as 'Created: <path>' or 'Modified: <path>'.",
                false,
                0,
                1,
            ),
            role(
                "frontend",
                &["ui", "frontend", "component", "page", "view", "interface"],
                &["architect"],
                "Implement the frontend",
                "You are the frontend engineer. Implement the client-side work for this request.\n\nRequest: {request}\n{context}\nReport each file you touch as 'Created: <path>' or 'Modified: <path>'.",
                false,
                0,
                1,
            ),
            role(
                "database",
                &["database", "migration", "sql", "model", "table", "persistence"],
                &["architect"],
                "Implement the data layer",
                "You are the database engineer. Implement the storage work for this request.\n\nRequest: {request}\n{context}\nReport each file you touch as 'Created: <path>' or 'Modified: <path>'.",
                false,
                0,
                1,
            ),
            role(
                "tester",
                &["test", "verify", "coverage", "validation"],
                &["backend", "frontend", "database"],
                "Write tests",
                "You are the test engineer. Write tests for the work done so far.\n\nRequest: {request}\n{context}\nReport each file you touch as 'Created: <path>' or 'Modified: <path>'.",
                true,
                1,
                2,
            ),
            role(
                "reviewer",
                &["review", "audit", "quality", "refactor"],
                &["tester"],
                "Review the changes",
                "You are the reviewer. Review the changes made for this request and list recommendations under a '## Recommendations' heading.\n\nRequest: {request}\n{context}",
                true,
                2,
                3,
            ),
            role(
                "docs",
                &["document", "docs", "readme", "guide"],
                &["architect"],
                "Write documentation",
                "You are the technical writer. Document the work done for this request.\n\nRequest: {request}\n{context}\nReport each file you touch as 'Created: <path>' or 'Modified: <path>'.",
                true,
                3,
                3,
            ),
            role(
                DEFAULT_ROLE,
                &[],
                &[],
                "Complete the request",
                "Complete the following request end to end.\n\nRequest: {request}\n{context}\nReport each file you touch as 'Created: <path>' or 'Modified: <path>'.",
                false,
                0,
                0,
            ),
        ])
    }

    /// Look up a role by name.
    pub fn get(&self, name: &str) -> Option<&RoleSpec> {
        self.roles.iter().find(|r| r.name == name)
    }

    /// Roles whose keywords match the request, in table order.
    ///
    /// The default role never keyword-matches; it is selected explicitly
    /// by the builder when nothing else does.
    pub fn matching_roles(&self, request: &str) -> Vec<&RoleSpec> {
        let lower = request.to_lowercase();
        self.roles
            .iter()
            .filter(|r| !r.keywords.is_empty() && r.matches(&lower))
            .collect()
    }

    /// The fallback role.
    pub fn default_role(&self) -> Option<&RoleSpec> {
        self.get(DEFAULT_ROLE)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoleSpec> {
        self.roles.iter()
    }
}

impl Default for RoleTable {
    fn default() -> Self {
        Self::default_roster()
    }
}
