//! Bamboo vault library: markdown documents for tasks, habit logs and pomodoro sessions.
//! The core stays pure (parse, edit, serialize, reduce); filesystem access lives behind
//! `storage::VaultStore` and is orchestrated by `vault::Vault`.

pub use format::serialize;
pub use parser::{parse, parse_with_template};

pub mod core {
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use uuid::Uuid;

    /* ------------------------------- IDs ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TreeId(pub Uuid);

    impl TreeId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl Default for TreeId {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Opaque handle to one task inside one `TaskTree`.
    ///
    /// Handles are only meaningful for the tree that produced them; using one after the
    /// node was deleted, or against another tree, yields `TreeEditError::StaleNode`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeRef {
        pub(crate) tree: TreeId,
        pub(crate) index: usize,
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum DocumentKind {
        TaskList,
        HabitLog,
        SessionLog,
    }

    impl fmt::Display for DocumentKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                DocumentKind::TaskList => "task list",
                DocumentKind::HabitLog => "habit log",
                DocumentKind::SessionLog => "session log",
            })
        }
    }

    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum ParseError {
        #[error("document has no title with a date and no `Date:` line")]
        MissingHeader,
        #[error("document body does not look like a {expected}")]
        ShapeMismatch { expected: DocumentKind },
    }

    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum TreeEditError {
        #[error("task has no preceding sibling to nest under")]
        NoPrecedingSibling,
        #[error("task is already at the top level")]
        NoParent,
        #[error("task text cannot be empty")]
        EmptyText,
        #[error("task reference is stale or belongs to another list")]
        StaleNode,
    }

    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum FieldEditError {
        #[error("field name cannot be empty")]
        EmptyName,
        #[error("field value cannot be empty")]
        EmptyValue,
        #[error("unknown field: {0}")]
        UnknownField(String),
        #[error("{0:?} cannot contain brackets or control characters")]
        InvalidName(String),
    }

    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum CycleEditError {
        #[error("no cycle number left after {0}")]
        IndexExhausted(u32),
        #[error("total focus time would exceed {} minutes", u32::MAX)]
        TotalOverflow,
    }

    /// A tolerated anomaly found while parsing; `line` is 1-based.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ParseWarning {
        pub line: usize,
        pub message: String,
    }

    /* ------------------------------ Aggregate ------------------------------ */

    /// Where the header date was read from; controls whether a `Date:` line is written back.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub enum DateSource {
        #[default]
        Line,
        Title,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DocHeader {
        pub title: String,
        pub date: NaiveDate,
        #[serde(default)]
        pub date_source: DateSource,
        /// `Key: Value` lines other than `Date:`, in file order.
        #[serde(default)]
        pub meta: IndexMap<String, String>,
    }

    impl DocHeader {
        pub fn new(title: impl Into<String>, date: NaiveDate) -> Self {
            Self {
                title: title.into(),
                date,
                date_source: DateSource::Line,
                meta: IndexMap::new(),
            }
        }
    }

    /// Aggregate root: one markdown file of the vault.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "kind")]
    pub enum Document {
        TaskList { header: DocHeader, tasks: TaskTree },
        HabitLog { header: DocHeader, log: HabitLog },
        SessionLog { header: DocHeader, session: SessionLog },
    }

    impl Document {
        pub fn new_task_list(date: NaiveDate) -> Self {
            let mut header = DocHeader::new(format!("Tasks - {}", date), date);
            header.date_source = DateSource::Title;
            Document::TaskList {
                header,
                tasks: TaskTree::new(),
            }
        }

        pub fn new_habit_log(
            name: &str,
            date: NaiveDate,
            template: Option<&HabitTemplate>,
        ) -> Self {
            let log = match template {
                Some(t) => HabitLog::from_template(t),
                None => HabitLog::default(),
            };
            Document::HabitLog {
                header: DocHeader::new(format!("Habit: {}", name), date),
                log,
            }
        }

        pub fn new_session_log(name: &str, date: NaiveDate) -> Self {
            Document::SessionLog {
                header: DocHeader::new(format!("Pomodoro Session: {}", name), date),
                session: SessionLog::new(name),
            }
        }

        pub fn kind(&self) -> DocumentKind {
            match self {
                Document::TaskList { .. } => DocumentKind::TaskList,
                Document::HabitLog { .. } => DocumentKind::HabitLog,
                Document::SessionLog { .. } => DocumentKind::SessionLog,
            }
        }

        pub fn header(&self) -> &DocHeader {
            match self {
                Document::TaskList { header, .. }
                | Document::HabitLog { header, .. }
                | Document::SessionLog { header, .. } => header,
            }
        }

        pub fn header_mut(&mut self) -> &mut DocHeader {
            match self {
                Document::TaskList { header, .. }
                | Document::HabitLog { header, .. }
                | Document::SessionLog { header, .. } => header,
            }
        }

        pub fn tasks(&self) -> Option<&TaskTree> {
            match self {
                Document::TaskList { tasks, .. } => Some(tasks),
                _ => None,
            }
        }

        pub fn tasks_mut(&mut self) -> Option<&mut TaskTree> {
            match self {
                Document::TaskList { tasks, .. } => Some(tasks),
                _ => None,
            }
        }

        pub fn habit(&self) -> Option<&HabitLog> {
            match self {
                Document::HabitLog { log, .. } => Some(log),
                _ => None,
            }
        }

        pub fn habit_mut(&mut self) -> Option<&mut HabitLog> {
            match self {
                Document::HabitLog { log, .. } => Some(log),
                _ => None,
            }
        }

        pub fn session(&self) -> Option<&SessionLog> {
            match self {
                Document::SessionLog { session, .. } => Some(session),
                _ => None,
            }
        }

        pub fn session_mut(&mut self) -> Option<&mut SessionLog> {
            match self {
                Document::SessionLog { session, .. } => Some(session),
                _ => None,
            }
        }
    }

    /* ------------------------------ Task arena ------------------------------ */

    /// Spaces per nesting level in task lists.
    pub const INDENT_WIDTH: usize = 4;

    /// Slot 0 is a hidden sentinel whose children are the top-level tasks.
    pub(crate) const ROOT: usize = 0;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TaskNode {
        pub text: String,
        pub done: bool,
    }

    #[derive(Debug, Clone)]
    pub(crate) struct Slot {
        pub(crate) node: TaskNode,
        pub(crate) parent: Option<usize>,
        pub(crate) prev: Option<usize>,
        pub(crate) next: Option<usize>,
        pub(crate) first_child: Option<usize>,
        pub(crate) last_child: Option<usize>,
        pub(crate) live: bool,
    }

    impl Slot {
        fn detached(node: TaskNode) -> Self {
            Self {
                node,
                parent: None,
                prev: None,
                next: None,
                first_child: None,
                last_child: None,
                live: true,
            }
        }
    }

    /// Owned, nested view of a task and its subtree; the serde form of `TaskTree`.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TaskOutline {
        pub text: String,
        pub done: bool,
        #[serde(default)]
        pub children: Vec<TaskOutline>,
    }

    /// Arena-backed task forest with sibling and child links.
    ///
    /// Deleted slots stay in the arena (marked dead) so outstanding `NodeRef`s can be
    /// detected as stale. Cloning keeps the tree id, so handles stay valid on the clone.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(from = "Vec<TaskOutline>", into = "Vec<TaskOutline>")]
    pub struct TaskTree {
        pub(crate) id: TreeId,
        pub(crate) slots: Vec<Slot>,
        pub(crate) live_count: usize,
    }

    impl TaskTree {
        pub fn new() -> Self {
            let sentinel = Slot::detached(TaskNode {
                text: String::new(),
                done: false,
            });
            Self {
                id: TreeId::new(),
                slots: vec![sentinel],
                live_count: 0,
            }
        }

        pub fn id(&self) -> TreeId {
            self.id
        }

        /// Number of live tasks.
        pub fn len(&self) -> usize {
            self.live_count
        }

        pub fn is_empty(&self) -> bool {
            self.live_count == 0
        }

        pub fn roots(&self) -> Vec<NodeRef> {
            self.child_indices(ROOT).map(|i| self.handle(i)).collect()
        }

        pub fn get(&self, node: NodeRef) -> Option<&TaskNode> {
            self.resolve(node).ok().map(|i| &self.slots[i].node)
        }

        pub fn children(&self, node: NodeRef) -> Result<Vec<NodeRef>, TreeEditError> {
            let idx = self.resolve(node)?;
            Ok(self.child_indices(idx).map(|i| self.handle(i)).collect())
        }

        /// `Ok(None)` for top-level tasks.
        pub fn parent(&self, node: NodeRef) -> Result<Option<NodeRef>, TreeEditError> {
            let idx = self.resolve(node)?;
            Ok(match self.slots[idx].parent {
                Some(p) if p != ROOT => Some(self.handle(p)),
                _ => None,
            })
        }

        pub fn depth(&self, node: NodeRef) -> Result<usize, TreeEditError> {
            let mut idx = self.resolve(node)?;
            let mut depth = 0;
            while let Some(p) = self.slots[idx].parent {
                if p == ROOT {
                    break;
                }
                depth += 1;
                idx = p;
            }
            Ok(depth)
        }

        /// Pre-order list of `(node, depth)`; the order tasks appear on screen and on disk.
        pub fn flatten(&self) -> Vec<(NodeRef, usize)> {
            let mut out = Vec::with_capacity(self.live_count);
            let mut stack: Vec<(usize, usize)> = Vec::new();
            if let Some(first) = self.slots[ROOT].first_child {
                stack.push((first, 0));
            }
            while let Some((idx, depth)) = stack.pop() {
                out.push((self.handle(idx), depth));
                let slot = &self.slots[idx];
                if let Some(next) = slot.next {
                    stack.push((next, depth));
                }
                if let Some(child) = slot.first_child {
                    stack.push((child, depth + 1));
                }
            }
            out
        }

        /// Node at a 0-based position of `flatten()`.
        pub fn node_at(&self, position: usize) -> Option<NodeRef> {
            self.flatten().get(position).map(|(n, _)| *n)
        }

        pub fn completed_count(&self) -> usize {
            self.slots
                .iter()
                .skip(1)
                .filter(|s| s.live && s.node.done)
                .count()
        }

        pub fn to_outline(&self) -> Vec<TaskOutline> {
            self.child_indices(ROOT)
                .map(|i| self.outline_of(i))
                .collect()
        }

        fn outline_of(&self, idx: usize) -> TaskOutline {
            let slot = &self.slots[idx];
            TaskOutline {
                text: slot.node.text.clone(),
                done: slot.node.done,
                children: self.child_indices(idx).map(|c| self.outline_of(c)).collect(),
            }
        }

        /* ---- internal link plumbing, shared with the editor and parser ---- */

        pub(crate) fn handle(&self, index: usize) -> NodeRef {
            NodeRef {
                tree: self.id,
                index,
            }
        }

        pub(crate) fn resolve(&self, node: NodeRef) -> Result<usize, TreeEditError> {
            if node.tree != self.id || node.index == ROOT {
                return Err(TreeEditError::StaleNode);
            }
            match self.slots.get(node.index) {
                Some(slot) if slot.live => Ok(node.index),
                _ => Err(TreeEditError::StaleNode),
            }
        }

        pub(crate) fn child_indices(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
            std::iter::successors(self.slots[idx].first_child, move |&c| self.slots[c].next)
        }

        pub(crate) fn alloc(&mut self, node: TaskNode) -> usize {
            self.slots.push(Slot::detached(node));
            self.live_count += 1;
            self.slots.len() - 1
        }

        pub(crate) fn link_last_child(&mut self, parent: usize, idx: usize) {
            let old_last = self.slots[parent].last_child;
            {
                let slot = &mut self.slots[idx];
                slot.parent = Some(parent);
                slot.prev = old_last;
                slot.next = None;
            }
            match old_last {
                Some(last) => self.slots[last].next = Some(idx),
                None => self.slots[parent].first_child = Some(idx),
            }
            self.slots[parent].last_child = Some(idx);
        }

        pub(crate) fn link_after(&mut self, anchor: usize, idx: usize) {
            let parent = self.slots[anchor].parent;
            let next = self.slots[anchor].next;
            {
                let slot = &mut self.slots[idx];
                slot.parent = parent;
                slot.prev = Some(anchor);
                slot.next = next;
            }
            self.slots[anchor].next = Some(idx);
            match next {
                Some(n) => self.slots[n].prev = Some(idx),
                None => {
                    if let Some(p) = parent {
                        self.slots[p].last_child = Some(idx);
                    }
                }
            }
        }

        pub(crate) fn unlink(&mut self, idx: usize) {
            let (parent, prev, next) = {
                let s = &self.slots[idx];
                (s.parent, s.prev, s.next)
            };
            match prev {
                Some(p) => self.slots[p].next = next,
                None => {
                    if let Some(par) = parent {
                        self.slots[par].first_child = next;
                    }
                }
            }
            match next {
                Some(n) => self.slots[n].prev = prev,
                None => {
                    if let Some(par) = parent {
                        self.slots[par].last_child = prev;
                    }
                }
            }
            let slot = &mut self.slots[idx];
            slot.parent = None;
            slot.prev = None;
            slot.next = None;
        }

        /// Appends a continuation line to a node's text, joined by one space.
        pub(crate) fn append_continuation(&mut self, idx: usize, extra: &str) {
            let text = &mut self.slots[idx].node.text;
            if text.is_empty() {
                text.push_str(extra);
            } else {
                text.push(' ');
                text.push_str(extra);
            }
        }

        fn push_outline(&mut self, parent: usize, outline: TaskOutline) {
            let idx = self.alloc(TaskNode {
                text: outline.text,
                done: outline.done,
            });
            self.link_last_child(parent, idx);
            for child in outline.children {
                self.push_outline(idx, child);
            }
        }
    }

    impl Default for TaskTree {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Trees compare by content; the id and dead slots are ignored.
    impl PartialEq for TaskTree {
        fn eq(&self, other: &Self) -> bool {
            self.to_outline() == other.to_outline()
        }
    }

    impl Eq for TaskTree {}

    impl From<Vec<TaskOutline>> for TaskTree {
        fn from(outlines: Vec<TaskOutline>) -> Self {
            let mut tree = TaskTree::new();
            for o in outlines {
                tree.push_outline(ROOT, o);
            }
            tree
        }
    }

    impl From<TaskTree> for Vec<TaskOutline> {
        fn from(tree: TaskTree) -> Self {
            tree.to_outline()
        }
    }

    /// Joins the non-blank lines of `text` into one line; task text never spans lines on disk.
    pub fn collapse_lines(text: &str) -> String {
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /* ------------------------------ Habit logs ------------------------------ */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Field {
        pub name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub unit_hint: Option<String>,
        #[serde(default)]
        pub values: Vec<String>,
    }

    impl Field {
        pub fn new(name: impl Into<String>, unit_hint: Option<String>) -> Self {
            Self {
                name: name.into(),
                unit_hint,
                values: vec![],
            }
        }
    }

    /// Fields keyed by name; iteration order is the on-disk order.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct HabitLog {
        pub fields: IndexMap<String, Field>,
    }

    impl HabitLog {
        pub fn from_template(template: &HabitTemplate) -> Self {
            let fields = template
                .fields
                .iter()
                .map(|spec| {
                    (
                        spec.name.clone(),
                        Field::new(spec.name.clone(), spec.unit_hint.clone()),
                    )
                })
                .collect();
            Self { fields }
        }

        pub fn field(&self, name: &str) -> Option<&Field> {
            self.fields.get(name)
        }

        /// A day counts as done once any field holds a non-blank value.
        pub fn is_completed(&self) -> bool {
            self.fields
                .values()
                .flat_map(|f| f.values.iter())
                .any(|v| !v.trim().is_empty())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct FieldSpec {
        pub name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub unit_hint: Option<String>,
    }

    impl FieldSpec {
        pub fn new(name: impl Into<String>, unit_hint: Option<&str>) -> Self {
            Self {
                name: name.into(),
                unit_hint: unit_hint.map(str::to_string),
            }
        }
    }

    /// Per-habit field layout, stored under `Templates/Habits/`.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct HabitTemplate {
        pub name: String,
        pub fields: Vec<FieldSpec>,
    }

    impl HabitTemplate {
        pub fn default_for(name: &str) -> Self {
            Self {
                name: name.to_string(),
                fields: vec![
                    FieldSpec::new("Duration", Some("minutes")),
                    FieldSpec::new("Notes", None),
                ],
            }
        }
    }

    /* ----------------------------- Session logs ----------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CycleRecord {
        pub cycle_index: u32,
        pub focus_minutes: u32,
        pub break_minutes: u32,
        pub completed: bool,
    }

    /// A `## Heading` block the session codec does not interpret, kept as written.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RawSection {
        pub heading: String,
        pub lines: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SessionLog {
        pub session_name: String,
        #[serde(default)]
        pub cycles: Vec<CycleRecord>,
        #[serde(default)]
        pub total_focus_minutes: u32,
        #[serde(default)]
        pub extra_sections: Vec<RawSection>,
    }

    impl SessionLog {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                session_name: name.into(),
                cycles: vec![],
                total_focus_minutes: 0,
                extra_sections: vec![],
            }
        }

        pub fn completed_cycles(&self) -> usize {
            self.cycles.iter().filter(|c| c.completed).count()
        }

        /// Sum of break minutes, saturating at `u32::MAX`.
        pub fn total_break_minutes(&self) -> u32 {
            self.cycles
                .iter()
                .map(|c| c.break_minutes)
                .fold(0, u32::saturating_add)
        }

        /// Sum of focus minutes over the recorded cycles, saturating at `u32::MAX`.
        pub fn cycle_focus_minutes(&self) -> u32 {
            self.cycles
                .iter()
                .map(|c| c.focus_minutes)
                .fold(0, u32::saturating_add)
        }

        /// Number the next recorded cycle gets; `None` once `u32::MAX` is taken.
        pub fn next_cycle_index(&self) -> Option<u32> {
            self.cycles
                .iter()
                .map(|c| c.cycle_index)
                .max()
                .unwrap_or(0)
                .checked_add(1)
        }

        pub fn longest_focus_minutes(&self) -> u32 {
            self.cycles
                .iter()
                .map(|c| c.focus_minutes)
                .max()
                .unwrap_or(0)
        }
    }

}

pub mod parser {
    //! Tolerant parser for the vault's markdown dialect, built on `nom`.
    //!
    //! Parsing strategy:
    //! - The header (title, `Key: Value` lines) is scanned line by line.
    //! - Body lines are classified with small `nom` recognizers (task items, field headers,
    //!   cycle lines) and folded into the document for the requested kind.
    //! - Anything unexpected becomes a `ParseWarning`; only a missing date or a body that
    //!   clearly belongs to another kind fails the parse.

    use crate::core::*;
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while, take_while1, take_while_m_n},
        character::complete::{char, digit1, space0, space1},
        combinator::{eof, map_res, opt, rest},
        error::{VerboseError, VerboseErrorKind},
        sequence::{delimited, preceded, terminated, tuple},
    };

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /* ------------------------ Public entry points ------------------------ */

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Parsed {
        pub document: Document,
        pub warnings: Vec<ParseWarning>,
    }

    /// Parse `raw` as a document of `kind`, discarding warnings.
    pub fn parse(raw: &str, kind: DocumentKind) -> Result<Document, ParseError> {
        parse_with_template(raw, kind, None).map(|p| p.document)
    }

    /// Parse `raw` as a document of `kind`. For habit logs, `template` fixes the field
    /// order and seeds fields the file does not mention.
    pub fn parse_with_template(
        raw: &str,
        kind: DocumentKind,
        template: Option<&HabitTemplate>,
    ) -> Result<Parsed, ParseError> {
        let lines: Vec<&str> = raw.lines().collect();
        let (header, body_start) = parse_header(&lines)?;
        let body = Body {
            lines: &lines[body_start..],
            offset: body_start,
        };
        check_shape(&body, kind)?;

        let mut warnings = Vec::new();
        let document = match kind {
            DocumentKind::TaskList => Document::TaskList {
                tasks: parse_tasks(&body, &mut warnings),
                header,
            },
            DocumentKind::HabitLog => {
                let mut log = parse_habit(&body, &mut warnings);
                if let Some(t) = template {
                    log = apply_template(log, t);
                }
                Document::HabitLog { header, log }
            }
            DocumentKind::SessionLog => {
                let session = parse_session(&header.title, &body, &mut warnings);
                Document::SessionLog { header, session }
            }
        };

        for w in &warnings {
            log::debug!("[parser] {} line {}: {}", kind, w.line, w.message);
        }
        Ok(Parsed { document, warnings })
    }

    /// Parse a habit template: `# Template: Name` followed by `## Field [unit]` headers.
    /// Bullet lines under a header are allowed and ignored.
    pub fn parse_template(raw: &str) -> Result<HabitTemplate, ParseError> {
        let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
        let title = lines.next().map(title_text).ok_or(ParseError::MissingHeader)?;
        let name = title
            .strip_prefix("Template:")
            .map(str::trim)
            .unwrap_or(title)
            .to_string();
        let fields = lines
            .filter_map(section_heading)
            .map(|h| {
                let (name, unit) = split_field_heading(h);
                FieldSpec::new(name, unit)
            })
            .filter(|f| !f.name.is_empty())
            .collect();
        Ok(HabitTemplate { name, fields })
    }

    /* ------------------------------- Header ------------------------------- */

    struct Body<'a> {
        lines: &'a [&'a str],
        /// Index of `lines[0]` within the whole file.
        offset: usize,
    }

    impl<'a> Body<'a> {
        fn numbered(&self) -> impl Iterator<Item = (usize, &'a str)> + '_ {
            self.lines
                .iter()
                .enumerate()
                .map(move |(i, l)| (self.offset + i + 1, *l))
        }

        fn is_blank(&self) -> bool {
            self.lines.iter().all(|l| l.trim().is_empty())
        }
    }

    fn title_text(line: &str) -> &str {
        line.trim().trim_start_matches('#').trim()
    }

    fn parse_header(lines: &[&str]) -> Result<(DocHeader, usize), ParseError> {
        let title_idx = lines
            .iter()
            .position(|l| !l.trim().is_empty())
            .ok_or(ParseError::MissingHeader)?;
        let title = title_text(lines[title_idx]).to_string();

        let mut date_line: Option<NaiveDate> = None;
        let mut meta = IndexMap::new();
        let mut i = title_idx + 1;
        while i < lines.len() {
            let line = lines[i].trim();
            if line.is_empty() {
                i += 1;
                continue;
            }
            if line.starts_with('-') || line.starts_with('#') {
                break;
            }
            let Ok((_, (key, value))) = meta_line(line) else {
                break;
            };
            if date_line.is_none() && key.eq_ignore_ascii_case("date") {
                if let Some(d) = parse_date_exact(value) {
                    date_line = Some(d);
                    i += 1;
                    continue;
                }
            }
            meta.insert(key.to_string(), value.to_string());
            i += 1;
        }

        let (date, date_source) = match date_line {
            Some(d) => (d, DateSource::Line),
            None => (
                find_date(&title).ok_or(ParseError::MissingHeader)?,
                DateSource::Title,
            ),
        };
        let header = DocHeader {
            title,
            date,
            date_source,
            meta,
        };
        Ok((header, i))
    }

    /// `Key: Value`, where the key starts with a letter; the value may be empty.
    fn meta_line(i: &str) -> PResult<'_, (&str, &str)> {
        let (i, key) = take_while1(|c: char| {
            c.is_alphanumeric() || c == ' ' || c == '_' || c == '-'
        })(i)?;
        if !key.starts_with(|c: char| c.is_alphabetic()) {
            return Err(nom::Err::Error(VerboseError {
                errors: vec![(i, VerboseErrorKind::Context("metadata key"))],
            }));
        }
        let (i, _) = char(':')(i)?;
        let (i, value) = rest(i)?;
        Ok((i, (key.trim(), value.trim())))
    }

    fn date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            tuple((
                take_while_m_n(4, 4, |c: char| c.is_ascii_digit()),
                char('-'),
                take_while_m_n(2, 2, |c: char| c.is_ascii_digit()),
                char('-'),
                take_while_m_n(2, 2, |c: char| c.is_ascii_digit()),
            )),
            |(y, _, m, _, d): (&str, char, &str, char, &str)| {
                match (y.parse(), m.parse(), d.parse()) {
                    (Ok(y), Ok(m), Ok(d)) => NaiveDate::from_ymd_opt(y, m, d).ok_or("invalid date"),
                    _ => Err("invalid date"),
                }
            },
        )(i)
    }

    fn parse_date_exact(s: &str) -> Option<NaiveDate> {
        terminated(date, eof)(s.trim()).ok().map(|(_, d)| d)
    }

    /// First `YYYY-MM-DD` stamp inside `text`, e.g. the one in `Tasks - 2025-01-20`.
    pub(crate) fn find_date(text: &str) -> Option<NaiveDate> {
        text.char_indices()
            .filter(|(_, c)| c.is_ascii_digit())
            .find_map(|(idx, _)| date(&text[idx..]).ok().map(|(_, d)| d))
    }

    /* ------------------------------- Shape ------------------------------- */

    pub(crate) fn section_heading(line: &str) -> Option<&str> {
        line.trim_end().strip_prefix("## ").map(str::trim)
    }

    fn check_shape(body: &Body<'_>, kind: DocumentKind) -> Result<(), ParseError> {
        let headings: Vec<&str> = body.lines.iter().filter_map(|l| section_heading(l)).collect();
        let fits = match kind {
            DocumentKind::TaskList => {
                headings.is_empty() || body.lines.iter().any(|l| task_line(l).is_ok())
            }
            DocumentKind::HabitLog => body.is_blank() || !headings.is_empty(),
            DocumentKind::SessionLog => {
                body.is_blank() || headings.iter().any(|h| *h == "Cycles" || *h == "Summary")
            }
        };
        if fits {
            Ok(())
        } else {
            Err(ParseError::ShapeMismatch { expected: kind })
        }
    }

    /* ------------------------------- Tasks ------------------------------- */

    fn checkbox(i: &str) -> PResult<'_, bool> {
        let (i, mark) = delimited(
            tag("- ["),
            alt((char(' '), char('x'), char('X'))),
            char(']'),
        )(i)?;
        Ok((i, mark != ' '))
    }

    /// `<indent>- [ ] text`; returns indent width (tabs count as a full level), state and text.
    fn task_line(i: &str) -> PResult<'_, (usize, bool, &str)> {
        let (i, indent) = take_while(|c: char| c == ' ' || c == '\t')(i)?;
        let (i, done) = checkbox(i)?;
        if !(i.is_empty() || i.starts_with(char::is_whitespace)) {
            return Err(nom::Err::Error(VerboseError {
                errors: vec![(i, VerboseErrorKind::Context("space after checkbox"))],
            }));
        }
        let width: usize = indent
            .chars()
            .map(|c| if c == '\t' { INDENT_WIDTH } else { 1 })
            .sum();
        Ok(("", (width, done, i.trim())))
    }

    fn parse_tasks(body: &Body<'_>, warnings: &mut Vec<ParseWarning>) -> TaskTree {
        let mut tree = TaskTree::new();
        // path[d] is the most recent node at depth d
        let mut path: Vec<usize> = Vec::new();

        for (line_no, line) in body.numbered() {
            if line.trim().is_empty() {
                continue;
            }
            match task_line(line) {
                Ok((_, (width, done, text))) => {
                    let wanted = width / INDENT_WIDTH;
                    let depth = wanted.min(path.len());
                    if depth < wanted {
                        warnings.push(ParseWarning {
                            line: line_no,
                            message: format!("task nested {} levels too deep", wanted - depth),
                        });
                    }
                    path.truncate(depth);
                    let parent = path.last().copied().unwrap_or(ROOT);
                    let idx = tree.alloc(TaskNode {
                        text: text.to_string(),
                        done,
                    });
                    tree.link_last_child(parent, idx);
                    path.push(idx);
                }
                Err(_) => match path.last() {
                    Some(&last) => tree.append_continuation(last, line.trim()),
                    None => warnings.push(ParseWarning {
                        line: line_no,
                        message: format!("text before the first task dropped: {:?}", line.trim()),
                    }),
                },
            }
        }
        tree
    }

    /* ------------------------------- Habits ------------------------------- */

    /// `Name [unit]` (the part after `## `).
    fn field_heading(i: &str) -> PResult<'_, (&str, Option<&str>)> {
        let (i, name) = take_while1(|c: char| c != '[')(i)?;
        let (i, unit) = opt(delimited(char('['), take_while(|c: char| c != ']'), char(']')))(i)?;
        let (i, _) = terminated(space0, eof)(i)?;
        Ok((i, (name.trim(), unit.map(str::trim).filter(|u| !u.is_empty()))))
    }

    pub(crate) fn split_field_heading(heading: &str) -> (&str, Option<&str>) {
        field_heading(heading)
            .map(|(_, parts)| parts)
            .unwrap_or((heading.trim(), None))
    }

    fn bullet_value(line: &str) -> Option<&str> {
        let t = line.trim();
        if t == "-" {
            return Some("");
        }
        t.strip_prefix("- ").map(str::trim)
    }

    fn parse_habit(body: &Body<'_>, warnings: &mut Vec<ParseWarning>) -> HabitLog {
        let mut fields: IndexMap<String, Field> = IndexMap::new();
        let mut current: Option<String> = None;

        for (line_no, line) in body.numbered() {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(heading) = section_heading(line) {
                let (name, unit) = split_field_heading(heading);
                if name.is_empty() {
                    warnings.push(ParseWarning {
                        line: line_no,
                        message: "field header without a name".into(),
                    });
                    current = None;
                    continue;
                }
                match fields.get_mut(name) {
                    Some(existing) => {
                        warnings.push(ParseWarning {
                            line: line_no,
                            message: format!("repeated field {:?} merged", name),
                        });
                        if existing.unit_hint.is_none() {
                            existing.unit_hint = unit.map(str::to_string);
                        }
                    }
                    None => {
                        fields.insert(
                            name.to_string(),
                            Field::new(name, unit.map(str::to_string)),
                        );
                    }
                }
                current = Some(name.to_string());
                continue;
            }
            match (bullet_value(line), current.as_ref().and_then(|c| fields.get_mut(c))) {
                (Some(""), Some(_)) => {}
                (Some(value), Some(field)) => field.values.push(value.to_string()),
                _ => warnings.push(ParseWarning {
                    line: line_no,
                    message: format!("ignored line {:?}", line.trim()),
                }),
            }
        }
        HabitLog { fields }
    }

    /// Template fields first, in template order; fields only present in the file follow.
    fn apply_template(mut log: HabitLog, template: &HabitTemplate) -> HabitLog {
        let mut fields = IndexMap::with_capacity(log.fields.len() + template.fields.len());
        for spec in &template.fields {
            let field = match log.fields.shift_remove(&spec.name) {
                Some(mut f) => {
                    if f.unit_hint.is_none() {
                        f.unit_hint = spec.unit_hint.clone();
                    }
                    f
                }
                None => Field::new(spec.name.clone(), spec.unit_hint.clone()),
            };
            fields.insert(spec.name.clone(), field);
        }
        fields.extend(log.fields);
        HabitLog { fields }
    }

    /* ------------------------------ Sessions ------------------------------ */

    fn number(i: &str) -> PResult<'_, u32> {
        map_res(digit1, str::parse::<u32>)(i)
    }

    /// `- [x] Cycle N: F min focus, B min break`
    fn cycle_line(i: &str) -> PResult<'_, CycleRecord> {
        let (i, completed) = checkbox(i)?;
        let (i, (_, _, _, cycle_index, _, _, focus_minutes, _, _)) = tuple((
            space1,
            tag("Cycle"),
            space1,
            number,
            char(':'),
            space0,
            number,
            space1,
            tag("min focus"),
        ))(i)?;
        let (i, (_, _, break_minutes, _, _, _)) = tuple((
            char(','),
            space0,
            number,
            space1,
            tag("min break"),
            terminated(space0, eof),
        ))(i)?;
        Ok((
            i,
            CycleRecord {
                cycle_index,
                focus_minutes,
                break_minutes,
                completed,
            },
        ))
    }

    /// `- Total focus: N min`
    fn total_focus_line(i: &str) -> PResult<'_, u32> {
        terminated(
            preceded(tuple((tag("- Total focus:"), space0)), number),
            tuple((space1, tag("min"), space0, eof)),
        )(i)
    }

    enum Section {
        Preamble,
        Cycles,
        Summary,
        Extra(usize),
    }

    fn parse_session(title: &str, body: &Body<'_>, warnings: &mut Vec<ParseWarning>) -> SessionLog {
        let name = title
            .strip_prefix("Pomodoro Session:")
            .map(str::trim)
            .unwrap_or(title);
        let mut session = SessionLog::new(name);
        let mut total_focus: Option<u32> = None;
        let mut section = Section::Preamble;

        for (line_no, line) in body.numbered() {
            if let Some(heading) = section_heading(line) {
                section = match heading {
                    "Cycles" => Section::Cycles,
                    "Summary" => Section::Summary,
                    other => {
                        session.extra_sections.push(RawSection {
                            heading: other.to_string(),
                            lines: vec![],
                        });
                        Section::Extra(session.extra_sections.len() - 1)
                    }
                };
                continue;
            }
            if let Section::Extra(idx) = section {
                session.extra_sections[idx].lines.push(line.to_string());
                continue;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match section {
                Section::Cycles => match cycle_line(trimmed) {
                    Ok((_, cycle)) => session.cycles.push(cycle),
                    Err(_) => warnings.push(ParseWarning {
                        line: line_no,
                        message: format!("unrecognized cycle line {:?}", trimmed),
                    }),
                },
                // Other summary lines are derived from the cycles on save.
                Section::Summary => {
                    if let Ok((_, minutes)) = total_focus_line(trimmed) {
                        total_focus = Some(minutes);
                    }
                }
                _ => warnings.push(ParseWarning {
                    line: line_no,
                    message: format!("text outside any section dropped: {:?}", trimmed),
                }),
            }
        }

        for extra in &mut session.extra_sections {
            while extra.lines.last().is_some_and(|l| l.trim().is_empty()) {
                extra.lines.pop();
            }
        }
        session.total_focus_minutes =
            total_focus.unwrap_or_else(|| session.cycle_focus_minutes());
        session
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const TASKS: &str = "# Tasks - 2025-01-20\n\
- [ ] Write project proposal\n\
- [x] Read 30 pages\n    - [x] Chapter 3\n    - [ ] Chapter 4\n\
- [ ] Workout at 7pm\n";

        fn day(y: i32, m: u32, d: u32) -> NaiveDate {
            NaiveDate::from_ymd_opt(y, m, d).unwrap()
        }

        #[test]
        fn task_example_builds_expected_tree() {
            let doc = parse(TASKS, DocumentKind::TaskList).unwrap();
            assert_eq!(doc.header().date, day(2025, 1, 20));
            assert_eq!(doc.header().date_source, DateSource::Title);
            let tree = doc.tasks().unwrap();
            let roots = tree.roots();
            assert_eq!(roots.len(), 3);
            let kids = tree.children(roots[1]).unwrap();
            assert_eq!(kids.len(), 2);
            assert_eq!(tree.get(kids[0]).unwrap().text, "Chapter 3");
            assert!(tree.get(kids[0]).unwrap().done);
            assert!(!tree.get(kids[1]).unwrap().done);
            assert!(tree.get(roots[1]).unwrap().done);
        }

        #[test]
        fn overly_deep_tasks_are_clamped_with_a_warning() {
            let raw = "# Tasks - 2025-01-20\n- [ ] a\n            - [ ] too deep\n\t- [X] tabbed\n";
            let parsed = parse_with_template(raw, DocumentKind::TaskList, None).unwrap();
            let tree = parsed.document.tasks().unwrap();
            let depths: Vec<usize> = tree.flatten().into_iter().map(|(_, d)| d).collect();
            assert_eq!(depths, vec![0, 1, 1]);
            assert_eq!(parsed.warnings.len(), 1);
            assert_eq!(parsed.warnings[0].line, 3);
        }

        #[test]
        fn stray_lines_continue_the_previous_task() {
            let raw = "# Tasks - 2025-01-20\nnote before\n- [ ] buy\n  oat milk\n";
            let parsed = parse_with_template(raw, DocumentKind::TaskList, None).unwrap();
            let tree = parsed.document.tasks().unwrap();
            assert_eq!(tree.get(tree.roots()[0]).unwrap().text, "buy oat milk");
            assert_eq!(parsed.warnings.len(), 1);
        }

        #[test]
        fn header_reads_date_and_metadata_lines() {
            let raw = "# Habit: Running\nDate: 2025-02-03\nTime: 07:15\n\n## Duration [minutes]\n- 30\n\n## Notes\n";
            let doc = parse(raw, DocumentKind::HabitLog).unwrap();
            let header = doc.header();
            assert_eq!(header.title, "Habit: Running");
            assert_eq!(header.date, day(2025, 2, 3));
            assert_eq!(header.meta.get("Time").map(String::as_str), Some("07:15"));
            let log = doc.habit().unwrap();
            assert_eq!(log.fields["Duration"].unit_hint.as_deref(), Some("minutes"));
            assert_eq!(log.fields["Duration"].values, vec!["30"]);
            assert!(log.fields["Notes"].values.is_empty());
        }

        #[test]
        fn missing_date_is_a_header_error() {
            assert_eq!(
                parse("# Tasks\n- [ ] a\n", DocumentKind::TaskList),
                Err(ParseError::MissingHeader)
            );
            assert_eq!(parse("\n\n", DocumentKind::TaskList), Err(ParseError::MissingHeader));
        }

        #[test]
        fn wrong_body_shape_is_rejected() {
            let habit = "# Habit: Run\nDate: 2025-01-01\n\n## Notes\n- fine\n";
            assert_eq!(
                parse(habit, DocumentKind::TaskList),
                Err(ParseError::ShapeMismatch {
                    expected: DocumentKind::TaskList
                })
            );
            assert_eq!(
                parse(TASKS, DocumentKind::HabitLog),
                Err(ParseError::ShapeMismatch {
                    expected: DocumentKind::HabitLog
                })
            );
            assert_eq!(
                parse(habit, DocumentKind::SessionLog),
                Err(ParseError::ShapeMismatch {
                    expected: DocumentKind::SessionLog
                })
            );
        }

        #[test]
        fn repeated_habit_fields_merge_into_first() {
            let raw = "# Habit: Read\nDate: 2025-01-01\n\n## Pages\n- 10\n## Notes\n- ok\n## Pages\n- 5\n";
            let parsed = parse_with_template(raw, DocumentKind::HabitLog, None).unwrap();
            let log = parsed.document.habit().unwrap();
            let names: Vec<&str> = log.fields.keys().map(String::as_str).collect();
            assert_eq!(names, vec!["Pages", "Notes"]);
            assert_eq!(log.fields["Pages"].values, vec!["10", "5"]);
            assert_eq!(parsed.warnings.len(), 1);
        }

        #[test]
        fn template_orders_and_seeds_fields() {
            let raw = "# Habit: Run\nDate: 2025-01-01\n\n## Mood\n- good\n## Notes\n- easy\n";
            let template = HabitTemplate::default_for("Run");
            let parsed = parse_with_template(raw, DocumentKind::HabitLog, Some(&template)).unwrap();
            let log = parsed.document.habit().unwrap();
            let names: Vec<&str> = log.fields.keys().map(String::as_str).collect();
            assert_eq!(names, vec!["Duration", "Notes", "Mood"]);
            assert!(log.fields["Duration"].values.is_empty());
        }

        #[test]
        fn session_sections_are_read_positionally() {
            let raw = "# Pomodoro Session: Deep Work\nDate: 2025-03-01\n\n## Cycles\n\
- [x] Cycle 1: 25 min focus, 5 min break\n- [ ] Cycle 2: 50 min focus, 10 min break\n\n\
## Summary\n- Total focus: 75 min\n- Cycles completed: 1\n\n## Notes\nfelt good\n\n";
            let doc = parse(raw, DocumentKind::SessionLog).unwrap();
            let s = doc.session().unwrap();
            assert_eq!(s.session_name, "Deep Work");
            assert_eq!(s.cycles.len(), 2);
            assert!(!s.cycles[1].completed);
            assert_eq!(s.cycles[1].break_minutes, 10);
            assert_eq!(s.total_focus_minutes, 75);
            assert_eq!(
                s.extra_sections,
                vec![RawSection {
                    heading: "Notes".into(),
                    lines: vec!["felt good".into()],
                }]
            );
        }

        #[test]
        fn oversized_minutes_saturate_instead_of_overflowing() {
            let raw = "# Pomodoro Session: Marathon\nDate: 2025-03-01\n\n## Cycles\n\
- [x] Cycle 1: 4294967295 min focus, 4294967295 min break\n\
- [x] Cycle 2: 1 min focus, 5 min break\n\
- [x] Cycle 3: 99999999999 min focus, 5 min break\n";
            let parsed = parse_with_template(raw, DocumentKind::SessionLog, None).unwrap();
            let s = parsed.document.session().unwrap();
            assert_eq!(s.cycles.len(), 2);
            assert_eq!(parsed.warnings.len(), 1);
            assert_eq!(s.total_focus_minutes, u32::MAX);
            assert_eq!(s.total_break_minutes(), u32::MAX);

            let text = crate::format::serialize(&parsed.document);
            assert!(text.contains("- Total break: 4294967295 min\n"));
            let again = parse(&text, DocumentKind::SessionLog).unwrap();
            assert_eq!(crate::format::serialize(&again), text);
        }

        #[test]
        fn template_text_lists_field_headers() {
            let raw = "# Template: Running\n\n## Distance [km]\n- \n\n## Notes\n";
            let t = parse_template(raw).unwrap();
            assert_eq!(t.name, "Running");
            assert_eq!(
                t.fields,
                vec![FieldSpec::new("Distance", Some("km")), FieldSpec::new("Notes", None)]
            );
        }

        #[test]
        fn finds_dates_inside_titles() {
            assert_eq!(find_date("Tasks - 2025-01-20"), Some(day(2025, 1, 20)));
            assert_eq!(find_date("Tasks - 2025-13-40"), None);
            assert_eq!(find_date("No date"), None);
        }
    }
}

pub mod format {
    //! Canonical writer for vault documents. Output is LF-terminated and re-parses to an
    //! equal document, so `serialize(parse(serialize(d))) == serialize(d)`.

    use crate::core::*;
    use crate::parser::find_date;
    use std::fmt::Write;

    pub fn serialize(doc: &Document) -> String {
        let mut body = String::new();
        match doc {
            Document::TaskList { tasks, .. } => render_tasks(&mut body, tasks),
            Document::HabitLog { log, .. } => render_habit(&mut body, log),
            Document::SessionLog { session, .. } => render_session(&mut body, session),
        }

        let mut out = String::new();
        let header_lines = render_header(&mut out, doc.header());
        if header_lines > 0 && !body.is_empty() {
            out.push('\n');
        }
        out.push_str(&body);
        out
    }

    /// Writes the title and header lines; returns the number of lines after the title.
    fn render_header(out: &mut String, header: &DocHeader) -> usize {
        let _ = writeln!(out, "# {}", header.title);
        let mut lines = 0;
        // A date only implied by the title must still survive a title edit.
        let title_date_matches = find_date(&header.title) == Some(header.date);
        if header.date_source == DateSource::Line || !title_date_matches {
            let _ = writeln!(out, "Date: {}", header.date.format("%Y-%m-%d"));
            lines += 1;
        }
        for (key, value) in &header.meta {
            if value.is_empty() {
                let _ = writeln!(out, "{}:", key);
            } else {
                let _ = writeln!(out, "{}: {}", key, value);
            }
            lines += 1;
        }
        lines
    }

    fn render_tasks(out: &mut String, tasks: &TaskTree) {
        for (node, depth) in tasks.flatten() {
            let Some(task) = tasks.get(node) else {
                continue;
            };
            let mark = if task.done { "x" } else { " " };
            let text = collapse_lines(&task.text);
            let _ = write!(out, "{:width$}- [{}]", "", mark, width = depth * INDENT_WIDTH);
            if !text.is_empty() {
                out.push(' ');
                out.push_str(&text);
            }
            out.push('\n');
        }
    }

    fn field_heading(name: &str, unit: Option<&str>) -> String {
        match unit {
            Some(u) => format!("## {} [{}]", name, u),
            None => format!("## {}", name),
        }
    }

    fn render_habit(out: &mut String, log: &HabitLog) {
        for (i, field) in log.fields.values().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "{}", field_heading(&field.name, field.unit_hint.as_deref()));
            for value in field.values.iter().map(|v| collapse_lines(v)) {
                if !value.is_empty() {
                    let _ = writeln!(out, "- {}", value);
                }
            }
        }
    }

    fn render_session(out: &mut String, session: &SessionLog) {
        out.push_str("## Cycles\n");
        for c in &session.cycles {
            let _ = writeln!(
                out,
                "- [{}] Cycle {}: {} min focus, {} min break",
                if c.completed { "x" } else { " " },
                c.cycle_index,
                c.focus_minutes,
                c.break_minutes
            );
        }
        out.push_str("\n## Summary\n");
        let _ = writeln!(out, "- Total focus: {} min", session.total_focus_minutes);
        let _ = writeln!(out, "- Total break: {} min", session.total_break_minutes());
        let _ = writeln!(out, "- Cycles completed: {}", session.completed_cycles());
        for section in &session.extra_sections {
            let _ = writeln!(out, "\n## {}", section.heading);
            for line in &section.lines {
                let _ = writeln!(out, "{}", line);
            }
        }
    }

    /// Template file text: `# Template: Name` and one header per field.
    pub fn render_template(template: &HabitTemplate) -> String {
        let mut out = format!("# Template: {}\n", template.name);
        for spec in &template.fields {
            let _ = write!(
                out,
                "\n{}\n",
                field_heading(&spec.name, spec.unit_hint.as_deref())
            );
        }
        out
    }

}

pub mod editor {
    //! In-memory edits. Every operation validates its inputs before touching the arena,
    //! so a failed edit leaves the document unchanged.

    use crate::core::*;

    /* ------------------------------ Task tree ------------------------------ */

    impl TaskTree {
        fn checked_text(text: &str) -> Result<String, TreeEditError> {
            let text = collapse_lines(text);
            if text.is_empty() {
                return Err(TreeEditError::EmptyText);
            }
            Ok(text)
        }

        /// Appends a top-level task.
        pub fn push_root(&mut self, text: &str) -> Result<NodeRef, TreeEditError> {
            let text = Self::checked_text(text)?;
            let idx = self.alloc(TaskNode { text, done: false });
            self.link_last_child(ROOT, idx);
            Ok(self.handle(idx))
        }

        /// Appends a subtask as the last child of `parent`.
        pub fn append_child(&mut self, parent: NodeRef, text: &str) -> Result<NodeRef, TreeEditError> {
            let parent = self.resolve(parent)?;
            let text = Self::checked_text(text)?;
            let idx = self.alloc(TaskNode { text, done: false });
            self.link_last_child(parent, idx);
            Ok(self.handle(idx))
        }

        pub fn insert_sibling_after(
            &mut self,
            node: NodeRef,
            text: &str,
        ) -> Result<NodeRef, TreeEditError> {
            let anchor = self.resolve(node)?;
            let text = Self::checked_text(text)?;
            let idx = self.alloc(TaskNode { text, done: false });
            self.link_after(anchor, idx);
            Ok(self.handle(idx))
        }

        /// Flips completion of one task; parents and children are untouched.
        pub fn toggle(&mut self, node: NodeRef) -> Result<bool, TreeEditError> {
            let idx = self.resolve(node)?;
            let task = &mut self.slots[idx].node;
            task.done = !task.done;
            Ok(task.done)
        }

        pub fn set_done(&mut self, node: NodeRef, done: bool) -> Result<(), TreeEditError> {
            let idx = self.resolve(node)?;
            self.slots[idx].node.done = done;
            Ok(())
        }

        /// Moves `node` (with its subtree) to the end of its preceding sibling's children.
        pub fn indent(&mut self, node: NodeRef) -> Result<(), TreeEditError> {
            let idx = self.resolve(node)?;
            let prev = self.slots[idx].prev.ok_or(TreeEditError::NoPrecedingSibling)?;
            self.unlink(idx);
            self.link_last_child(prev, idx);
            Ok(())
        }

        /// Moves `node` (with its subtree) to directly after its parent.
        /// Later siblings stay with the old parent.
        pub fn unindent(&mut self, node: NodeRef) -> Result<(), TreeEditError> {
            let idx = self.resolve(node)?;
            let parent = match self.slots[idx].parent {
                Some(p) if p != ROOT => p,
                _ => return Err(TreeEditError::NoParent),
            };
            self.unlink(idx);
            self.link_after(parent, idx);
            Ok(())
        }

        /// Removes `node` and its subtree; returns how many tasks were removed.
        pub fn delete(&mut self, node: NodeRef) -> Result<usize, TreeEditError> {
            let idx = self.resolve(node)?;
            self.unlink(idx);
            let mut removed = 0;
            let mut stack = vec![idx];
            while let Some(i) = stack.pop() {
                stack.extend(self.child_indices(i));
                self.slots[i].live = false;
                removed += 1;
            }
            self.live_count -= removed;
            Ok(removed)
        }

        pub fn edit_text(&mut self, node: NodeRef, text: &str) -> Result<(), TreeEditError> {
            let idx = self.resolve(node)?;
            let text = Self::checked_text(text)?;
            self.slots[idx].node.text = text;
            Ok(())
        }
    }

    /* ------------------------------ Habit logs ------------------------------ */

    /// Field and value written by the quick "done" toggle.
    pub const COMPLETION_FIELD: &str = "Completion";
    pub const COMPLETION_VALUE: &str = "Completed: Yes";

    /// Trimmed field name, if it can be written as a `## Name [unit]` header and read back.
    pub fn validate_field_name(name: &str) -> Result<&str, FieldEditError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FieldEditError::EmptyName);
        }
        if name.contains(['[', ']']) || name.chars().any(char::is_control) {
            return Err(FieldEditError::InvalidName(name.to_string()));
        }
        Ok(name)
    }

    impl HabitLog {
        /// Returns the field named `name`, creating it at the end if missing.
        pub fn ensure_field(
            &mut self,
            name: &str,
            unit_hint: Option<&str>,
        ) -> Result<&mut Field, FieldEditError> {
            let name = validate_field_name(name)?;
            let unit_hint = unit_hint
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(validate_field_name)
                .transpose()?;
            Ok(self
                .fields
                .entry(name.to_string())
                .or_insert_with(|| Field::new(name, unit_hint.map(str::to_string))))
        }

        pub fn append_value(&mut self, name: &str, value: &str) -> Result<(), FieldEditError> {
            let value = collapse_lines(value);
            if value.is_empty() {
                return Err(FieldEditError::EmptyValue);
            }
            self.ensure_field(name, None)?.values.push(value);
            Ok(())
        }

        /// Replaces all values of an existing field; blank values are dropped.
        pub fn set_values(&mut self, name: &str, values: &[&str]) -> Result<(), FieldEditError> {
            let field = self
                .fields
                .get_mut(name.trim())
                .ok_or_else(|| FieldEditError::UnknownField(name.to_string()))?;
            field.values = values
                .iter()
                .map(|v| collapse_lines(v))
                .filter(|v| !v.is_empty())
                .collect();
            Ok(())
        }

        pub fn remove_field(&mut self, name: &str) -> Result<Field, FieldEditError> {
            self.fields
                .shift_remove(name.trim())
                .ok_or_else(|| FieldEditError::UnknownField(name.to_string()))
        }

        /// Records the day as done. Returns false if it was already marked.
        pub fn mark_completed(&mut self) -> bool {
            let field = self
                .fields
                .entry(COMPLETION_FIELD.to_string())
                .or_insert_with(|| Field::new(COMPLETION_FIELD, None));
            if field.values.iter().any(|v| v == COMPLETION_VALUE) {
                return false;
            }
            field.values.push(COMPLETION_VALUE.to_string());
            true
        }
    }

    /* ----------------------------- Session logs ----------------------------- */

    impl SessionLog {
        /// Appends the next cycle and adds its focus time to the running total.
        pub fn record_cycle(
            &mut self,
            focus_minutes: u32,
            break_minutes: u32,
            completed: bool,
        ) -> Result<CycleRecord, CycleEditError> {
            let last = self.cycles.iter().map(|c| c.cycle_index).max().unwrap_or(0);
            let cycle_index = self
                .next_cycle_index()
                .ok_or(CycleEditError::IndexExhausted(last))?;
            let total = self
                .total_focus_minutes
                .checked_add(focus_minutes)
                .ok_or(CycleEditError::TotalOverflow)?;
            let record = CycleRecord {
                cycle_index,
                focus_minutes,
                break_minutes,
                completed,
            };
            self.cycles.push(record);
            self.total_focus_minutes = total;
            Ok(record)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::format::serialize;
        use crate::parser::parse;

        const TASKS: &str = "# Tasks - 2025-01-20\n- [ ] Write project proposal\n- [x] Read 30 pages\n    - [x] Chapter 3\n    - [ ] Chapter 4\n- [ ] Workout at 7pm\n";

        fn texts(tree: &TaskTree) -> Vec<(String, usize)> {
            tree.flatten()
                .into_iter()
                .map(|(n, d)| (tree.get(n).unwrap().text.clone(), d))
                .collect()
        }

        fn example() -> Document {
            parse(TASKS, DocumentKind::TaskList).unwrap()
        }

        #[test]
        fn indent_moves_workout_under_reading() {
            let mut doc = example();
            let tree = doc.tasks_mut().unwrap();
            let workout = tree.roots()[2];
            tree.indent(workout).unwrap();
            let reading = tree.roots()[1];
            let kids = tree.children(reading).unwrap();
            assert_eq!(kids.len(), 3);
            assert_eq!(kids[2], workout);
            assert_eq!(tree.get(workout).unwrap().text, "Workout at 7pm");
            assert!(serialize(&doc).ends_with("    - [ ] Chapter 4\n    - [ ] Workout at 7pm\n"));
        }

        #[test]
        fn indent_then_unindent_restores_shape() {
            let mut doc = example();
            let before = serialize(&doc);
            let tree = doc.tasks_mut().unwrap();
            let workout = tree.roots()[2];
            tree.indent(workout).unwrap();
            tree.unindent(workout).unwrap();
            assert_eq!(serialize(&doc), before);
        }

        #[test]
        fn first_task_cannot_be_indented() {
            let mut doc = example();
            let tree = doc.tasks_mut().unwrap();
            let first = tree.roots()[0];
            let before = tree.clone();
            assert_eq!(tree.indent(first), Err(TreeEditError::NoPrecedingSibling));
            assert_eq!(tree.unindent(first), Err(TreeEditError::NoParent));
            assert_eq!(*tree, before);
        }

        #[test]
        fn toggle_leaves_parent_and_children_alone() {
            let mut doc = example();
            let tree = doc.tasks_mut().unwrap();
            let reading = tree.roots()[1];
            let kids = tree.children(reading).unwrap();
            assert!(!tree.toggle(reading).unwrap());
            assert!(tree.get(kids[0]).unwrap().done);
            assert!(tree.toggle(kids[1]).unwrap());
            assert!(!tree.get(reading).unwrap().done);
            assert_eq!(tree.completed_count(), 2);
        }

        #[test]
        fn unindent_keeps_later_siblings_with_old_parent() {
            let mut doc = example();
            let tree = doc.tasks_mut().unwrap();
            let reading = tree.roots()[1];
            let ch3 = tree.children(reading).unwrap()[0];
            tree.unindent(ch3).unwrap();
            assert_eq!(
                texts(tree),
                vec![
                    ("Write project proposal".into(), 0),
                    ("Read 30 pages".into(), 0),
                    ("Chapter 4".into(), 1),
                    ("Chapter 3".into(), 0),
                    ("Workout at 7pm".into(), 0),
                ]
            );
        }

        #[test]
        fn deleted_subtree_handles_become_stale() {
            let mut doc = example();
            let tree = doc.tasks_mut().unwrap();
            let reading = tree.roots()[1];
            let ch4 = tree.children(reading).unwrap()[1];
            assert_eq!(tree.delete(reading), Ok(3));
            assert_eq!(tree.len(), 2);
            assert_eq!(tree.toggle(ch4), Err(TreeEditError::StaleNode));
            assert_eq!(tree.delete(reading), Err(TreeEditError::StaleNode));
            let fresh = tree.push_root("new").unwrap();
            assert_ne!(fresh, reading);
        }

        #[test]
        fn editor_built_list_round_trips() {
            let mut doc = Document::new_task_list(chrono::NaiveDate::from_ymd_opt(2025, 5, 1).unwrap());
            let tree = doc.tasks_mut().unwrap();
            let a = tree.push_root("plan\nweek").unwrap();
            let b = tree.insert_sibling_after(a, "shop").unwrap();
            let milk = tree.append_child(b, "milk").unwrap();
            tree.insert_sibling_after(milk, "bread").unwrap();
            tree.insert_sibling_after(a, "call mum").unwrap();
            tree.toggle(milk).unwrap();
            let text = serialize(&doc);
            assert_eq!(
                text,
                "# Tasks - 2025-05-01\n- [ ] plan week\n- [ ] call mum\n- [ ] shop\n    - [x] milk\n    - [ ] bread\n"
            );
            assert_eq!(parse(&text, DocumentKind::TaskList).unwrap(), doc);
        }

        #[test]
        fn blank_text_is_rejected_without_mutation() {
            let mut tree = TaskTree::new();
            let a = tree.push_root("a").unwrap();
            assert_eq!(tree.edit_text(a, "  \n "), Err(TreeEditError::EmptyText));
            assert_eq!(tree.push_root(""), Err(TreeEditError::EmptyText));
            assert_eq!(tree.len(), 1);
            tree.edit_text(a, "renamed").unwrap();
            assert_eq!(tree.get(a).unwrap().text, "renamed");
        }

        #[test]
        fn mark_completed_is_idempotent() {
            let mut log = HabitLog::from_template(&HabitTemplate::default_for("Run"));
            assert!(log.mark_completed());
            assert!(!log.mark_completed());
            assert_eq!(log.fields[COMPLETION_FIELD].values, vec![COMPLETION_VALUE]);
            assert!(log.is_completed());
        }

        #[test]
        fn field_edits_validate_names_and_values() {
            let mut log = HabitLog::default();
            assert_eq!(log.append_value(" ", "x"), Err(FieldEditError::EmptyName));
            assert_eq!(log.append_value("Pages", " "), Err(FieldEditError::EmptyValue));
            log.append_value("Pages", "12").unwrap();
            log.set_values("Pages", &["20", ""]).unwrap();
            assert_eq!(log.fields["Pages"].values, vec!["20"]);
            assert_eq!(
                log.set_values("Mood", &["ok"]),
                Err(FieldEditError::UnknownField("Mood".into()))
            );
            assert_eq!(log.remove_field("Pages").unwrap().name, "Pages");
            assert!(log.fields.is_empty());
        }

        #[test]
        fn record_cycle_numbers_and_totals() {
            let mut s = SessionLog::new("Focus");
            assert_eq!(s.next_cycle_index(), Some(1));
            s.record_cycle(25, 5, true).unwrap();
            let second = s.record_cycle(25, 15, false).unwrap();
            assert_eq!(second.cycle_index, 2);
            assert_eq!(s.next_cycle_index(), Some(3));
            assert_eq!(s.total_focus_minutes, 50);
            assert_eq!(s.total_break_minutes(), 20);
            assert_eq!(s.completed_cycles(), 1);
            assert_eq!(s.longest_focus_minutes(), 25);
        }

        #[test]
        fn record_cycle_refuses_overflow_without_mutating() {
            let raw = "# Pomodoro Session: Late\nDate: 2025-03-01\n\n## Cycles\n\
- [x] Cycle 4294967295: 5 min focus, 1 min break\n";
            let mut doc = parse(raw, DocumentKind::SessionLog).unwrap();
            let s = doc.session_mut().unwrap();
            let before = s.clone();
            assert_eq!(s.next_cycle_index(), None);
            assert_eq!(
                s.record_cycle(25, 5, true),
                Err(CycleEditError::IndexExhausted(u32::MAX))
            );
            assert_eq!(*s, before);

            let mut full = SessionLog::new("Full");
            full.total_focus_minutes = u32::MAX - 10;
            assert_eq!(full.record_cycle(25, 5, true), Err(CycleEditError::TotalOverflow));
            assert!(full.cycles.is_empty());
            assert!(full.record_cycle(10, 5, true).is_ok());
        }

        #[test]
        fn bracketed_field_names_are_rejected() {
            let mut log = HabitLog::default();
            assert_eq!(
                log.append_value("Pace [fast]", "ok"),
                Err(FieldEditError::InvalidName("Pace [fast]".into()))
            );
            assert_eq!(
                log.ensure_field("Split]", None).err(),
                Some(FieldEditError::InvalidName("Split]".into()))
            );
            assert_eq!(
                log.ensure_field("Pace", Some("min[km")).err(),
                Some(FieldEditError::InvalidName("min[km".into()))
            );
            assert!(log.fields.is_empty());

            log.append_value("Pace", "fast").unwrap();
            let mut doc = Document::new_habit_log(
                "Run",
                chrono::NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
                None,
            );
            *doc.habit_mut().unwrap() = log;
            let text = serialize(&doc);
            assert_eq!(parse(&text, DocumentKind::HabitLog).unwrap(), doc);
        }
    }
}

pub mod streak {
    //! Streak reduction over a dated sequence of habit logs.

    use crate::core::HabitLog;
    use chrono::NaiveDate;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct StreakState {
        pub current: u32,
        pub best: u32,
    }

    impl StreakState {
        pub fn push(&mut self, completed: bool) {
            if completed {
                self.current = self.current.saturating_add(1);
                self.best = self.best.max(self.current);
            } else {
                self.current = 0;
            }
        }
    }

    pub fn is_completed(log: Option<&HabitLog>) -> bool {
        log.is_some_and(HabitLog::is_completed)
    }

    /// Reduces an ascending, gap-free day sequence. A missing log breaks the run.
    pub fn compute<'a, I>(days: I) -> StreakState
    where
        I: IntoIterator<Item = (NaiveDate, Option<&'a HabitLog>)>,
    {
        let mut state = StreakState::default();
        let mut last: Option<NaiveDate> = None;
        for (date, log) in days {
            if last.is_some_and(|prev| date <= prev) {
                log::debug!("[streak] day {} out of order after {:?}", date, last);
            }
            last = Some(date);
            state.push(is_completed(log));
        }
        state
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct HabitStats {
        pub current_streak: u32,
        pub best_streak: u32,
        pub total_entries: usize,
        pub last_logged: Option<NaiveDate>,
    }

    /// Statistics over every completed day on record.
    ///
    /// `completed_days` need not be sorted or unique. The current streak counts back from
    /// `today`, or from yesterday when today has no entry yet.
    pub fn summarize(completed_days: &[NaiveDate], today: NaiveDate) -> HabitStats {
        let mut days = completed_days.to_vec();
        days.sort_unstable();
        days.dedup();

        let mut best = 0u32;
        let mut run = 0u32;
        let mut prev: Option<NaiveDate> = None;
        for &d in &days {
            run = match prev {
                Some(p) if p.succ_opt() == Some(d) => run + 1,
                _ => 1,
            };
            best = best.max(run);
            prev = Some(d);
        }

        let mut current = 0u32;
        let mut cursor = if days.binary_search(&today).is_ok() {
            Some(today)
        } else {
            today.pred_opt()
        };
        while let Some(day) = cursor {
            if days.binary_search(&day).is_err() {
                break;
            }
            current += 1;
            cursor = day.pred_opt();
        }

        HabitStats {
            current_streak: current,
            best_streak: best,
            total_entries: days.len(),
            last_logged: days.last().copied(),
        }
    }

}

pub mod storage {
    use anyhow::{Context, Result};
    use std::{
        fs,
        io::{self, Write},
        path::{Path, PathBuf},
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct StoreEntry {
        pub path: PathBuf,
        pub is_dir: bool,
    }

    /// Raw text persistence for a vault.
    pub trait VaultStore {
        /// Reads a file; `Ok(None)` when it does not exist.
        fn load(&self, path: &Path) -> Result<Option<String>>;

        /// Replaces a file atomically (temp file in the same directory, then rename).
        fn save(&self, path: &Path, text: &str) -> Result<()>;

        fn ensure_dir(&self, path: &Path) -> Result<()>;

        /// Direct children of `dir`, sorted by path; empty when `dir` is missing.
        fn entries(&self, dir: &Path) -> Result<Vec<StoreEntry>>;
    }

    /// Local filesystem store.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FsStore;

    impl VaultStore for FsStore {
        fn load(&self, path: &Path) -> Result<Option<String>> {
            match fs::read_to_string(path) {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e).with_context(|| format!("reading {:?}", path)),
            }
        }

        fn save(&self, path: &Path, text: &str) -> Result<()> {
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            self.ensure_dir(dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(dir)
                .with_context(|| format!("creating temp file in {:?}", dir))?;
            tmp.write_all(text.as_bytes())
                .with_context(|| format!("writing {:?}", tmp.path()))?;
            tmp.as_file()
                .sync_all()
                .with_context(|| format!("syncing {:?}", tmp.path()))?;
            tmp.persist(path)
                .map_err(|e| e.error)
                .with_context(|| format!("replacing {:?}", path))?;
            Ok(())
        }

        fn ensure_dir(&self, path: &Path) -> Result<()> {
            fs::create_dir_all(path).with_context(|| format!("creating directory {:?}", path))
        }

        fn entries(&self, dir: &Path) -> Result<Vec<StoreEntry>> {
            let read = match fs::read_dir(dir) {
                Ok(r) => r,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
                Err(e) => return Err(e).with_context(|| format!("listing {:?}", dir)),
            };
            let mut out = Vec::new();
            for entry in read {
                let entry = entry.with_context(|| format!("listing {:?}", dir))?;
                let is_dir = entry
                    .file_type()
                    .with_context(|| format!("inspecting {:?}", entry.path()))?
                    .is_dir();
                out.push(StoreEntry {
                    path: entry.path(),
                    is_dir,
                });
            }
            out.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(out)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn missing_files_load_as_none() {
            let dir = tempfile::tempdir().unwrap();
            assert_eq!(FsStore.load(&dir.path().join("nope.md")).unwrap(), None);
            assert!(FsStore.entries(&dir.path().join("nowhere")).unwrap().is_empty());
        }

        #[test]
        fn save_creates_parents_and_replaces_content() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("Tasks").join("Task_2025-01-01.md");
            FsStore.save(&path, "first\n").unwrap();
            FsStore.save(&path, "second\n").unwrap();
            assert_eq!(FsStore.load(&path).unwrap().as_deref(), Some("second\n"));
            let entries = FsStore.entries(&dir.path().join("Tasks")).unwrap();
            assert_eq!(entries.len(), 1, "temp files must not linger");
            assert!(!entries[0].is_dir);
        }
    }
}

pub mod config {
    //! Vault configuration stored as `.bamboo_config.json` in the vault root.

    use anyhow::{Context, Result};
    use serde::{Deserialize, Serialize};
    use std::{ops::RangeInclusive, path::PathBuf};

    pub const CONFIG_FILE_NAME: &str = ".bamboo_config.json";

    pub const FOCUS_MINUTES: RangeInclusive<u32> = 1..=120;
    pub const BREAK_MINUTES: RangeInclusive<u32> = 1..=60;
    pub const LONG_BREAK_MINUTES: RangeInclusive<u32> = 1..=120;

    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum ConfigError {
        #[error("vault name cannot be empty")]
        EmptyVaultName,
        #[error("{setting} must be between {min} and {max} minutes, got {value}")]
        OutOfRange {
            setting: &'static str,
            value: u32,
            min: u32,
            max: u32,
        },
        #[error("cycles before a long break must be at least 1")]
        NoCycles,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct VaultConfig {
        pub vault_name: String,
        pub vault_path: Option<PathBuf>,
        pub pomodoro_focus: u32,
        pub pomodoro_break: u32,
        pub long_break: u32,
        pub cycles_before_long_break: u32,
    }

    impl Default for VaultConfig {
        fn default() -> Self {
            Self {
                vault_name: "BambooVault".to_string(),
                vault_path: None,
                pomodoro_focus: 25,
                pomodoro_break: 5,
                long_break: 15,
                cycles_before_long_break: 4,
            }
        }
    }

    fn in_range(
        setting: &'static str,
        value: u32,
        range: &RangeInclusive<u32>,
    ) -> Result<(), ConfigError> {
        if range.contains(&value) {
            Ok(())
        } else {
            Err(ConfigError::OutOfRange {
                setting,
                value,
                min: *range.start(),
                max: *range.end(),
            })
        }
    }

    pub fn check_focus_minutes(minutes: u32) -> Result<(), ConfigError> {
        in_range("focus duration", minutes, &FOCUS_MINUTES)
    }

    pub fn check_break_minutes(minutes: u32) -> Result<(), ConfigError> {
        in_range("break duration", minutes, &BREAK_MINUTES)
    }

    impl VaultConfig {
        pub fn validate(&self) -> Result<(), ConfigError> {
            if self.vault_name.trim().is_empty() {
                return Err(ConfigError::EmptyVaultName);
            }
            check_focus_minutes(self.pomodoro_focus)?;
            check_break_minutes(self.pomodoro_break)?;
            in_range("long break duration", self.long_break, &LONG_BREAK_MINUTES)?;
            if self.cycles_before_long_break == 0 {
                return Err(ConfigError::NoCycles);
            }
            Ok(())
        }

        pub fn from_json(text: &str) -> Result<Self> {
            let config: Self = serde_json::from_str(text).context("parsing vault config")?;
            config.validate()?;
            Ok(config)
        }

        pub fn to_json(&self) -> Result<String> {
            let mut text = serde_json::to_string_pretty(self).context("encoding vault config")?;
            text.push('\n');
            Ok(text)
        }

        pub fn pomodoro(&self) -> PomodoroSettings {
            PomodoroSettings {
                focus_minutes: self.pomodoro_focus,
                break_minutes: self.pomodoro_break,
                long_break_minutes: self.long_break,
                cycles_before_long_break: self.cycles_before_long_break,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PomodoroSettings {
        pub focus_minutes: u32,
        pub break_minutes: u32,
        pub long_break_minutes: u32,
        pub cycles_before_long_break: u32,
    }

    impl PomodoroSettings {
        /// Break following the 1-based `cycle_index`: long after every Nth cycle.
        pub fn break_after(&self, cycle_index: u32) -> u32 {
            let every = self.cycles_before_long_break.max(1);
            if cycle_index > 0 && cycle_index % every == 0 {
                self.long_break_minutes
            } else {
                self.break_minutes
            }
        }
    }

}

pub mod vault {
    //! Maps logical documents to files under the vault root and moves them through the
    //! parser and serializer.

    use crate::config::{CONFIG_FILE_NAME, VaultConfig};
    use crate::core::*;
    use crate::editor::validate_field_name;
    use crate::format::{render_template, serialize};
    use crate::parser::{parse_template, parse_with_template};
    use crate::storage::{FsStore, VaultStore};
    use crate::streak::{self, HabitStats, StreakState};
    use anyhow::{Context, Result, bail};
    use chrono::NaiveDate;
    use std::path::{Path, PathBuf};

    /* ------------------------------- Layout ------------------------------- */

    pub const POMODORO_DIR: &str = "Pomodoro";
    pub const HABITS_DIR: &str = "Habits";
    pub const TASKS_DIR: &str = "Tasks";
    pub const TEMPLATES_DIR: &str = "Templates";
    pub const TEMPLATE_SUFFIX: &str = ".template.md";

    fn habit_templates_dir(root: &Path) -> PathBuf {
        root.join(TEMPLATES_DIR).join(HABITS_DIR)
    }

    /// Habit and session names become path components.
    fn check_template_fields(template: &HabitTemplate) -> Result<()> {
        for spec in &template.fields {
            validate_field_name(&spec.name)?;
            if let Some(unit) = &spec.unit_hint {
                validate_field_name(unit)?;
            }
        }
        Ok(())
    }

    pub fn validate_name(name: &str) -> Result<&str> {
        let name = name.trim();
        if name.is_empty() {
            bail!("name cannot be empty");
        }
        if name == "." || name == ".." || name.contains(['/', '\\']) || name.chars().any(char::is_control) {
            bail!("invalid name {:?}", name);
        }
        Ok(name)
    }

    /// A vault root must be an existing directory or a new entry in an existing one.
    pub fn validate_vault_path(path: &Path) -> Result<()> {
        if path.exists() {
            if !path.is_dir() {
                bail!("{:?} exists and is not a directory", path);
            }
            return Ok(());
        }
        match path.parent() {
            Some(p) if p.as_os_str().is_empty() || p.is_dir() => Ok(()),
            _ => bail!("parent directory of {:?} does not exist", path),
        }
    }

    /// `<prefix>YYYY-MM-DD.md` → date.
    pub fn parse_dated_file_name(prefix: &str, file_name: &str) -> Option<NaiveDate> {
        let stamp = file_name.strip_prefix(prefix)?.strip_suffix(".md")?;
        NaiveDate::parse_from_str(stamp, "%Y-%m-%d").ok()
    }

    /// Logical address of one document.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub enum DocKey {
        Tasks { date: NaiveDate },
        Habit { name: String, date: NaiveDate },
        Session { name: String, date: NaiveDate },
    }

    impl DocKey {
        pub fn kind(&self) -> DocumentKind {
            match self {
                DocKey::Tasks { .. } => DocumentKind::TaskList,
                DocKey::Habit { .. } => DocumentKind::HabitLog,
                DocKey::Session { .. } => DocumentKind::SessionLog,
            }
        }

        pub fn date(&self) -> NaiveDate {
            match self {
                DocKey::Tasks { date } | DocKey::Habit { date, .. } | DocKey::Session { date, .. } => {
                    *date
                }
            }
        }

        fn name(&self) -> Option<&str> {
            match self {
                DocKey::Tasks { .. } => None,
                DocKey::Habit { name, .. } | DocKey::Session { name, .. } => Some(name.as_str()),
            }
        }

        pub fn file_name(&self) -> String {
            match self {
                DocKey::Tasks { date } => format!("Task_{}.md", date),
                DocKey::Habit { name, date } => format!("{}-{}.md", name, date),
                DocKey::Session { name, date } => format!("Pomodoro_{}_{}.md", name, date),
            }
        }

        /// Path relative to the vault root.
        pub fn relative_path(&self) -> PathBuf {
            let dir = match self {
                DocKey::Tasks { .. } => PathBuf::from(TASKS_DIR),
                DocKey::Habit { name, .. } => Path::new(HABITS_DIR).join(name),
                DocKey::Session { .. } => PathBuf::from(POMODORO_DIR),
            };
            dir.join(self.file_name())
        }

        /// Fresh document for this key; habit logs are seeded from `template`.
        pub fn new_document(&self, template: Option<&HabitTemplate>) -> Document {
            match self {
                DocKey::Tasks { date } => Document::new_task_list(*date),
                DocKey::Habit { name, date } => Document::new_habit_log(name, *date, template),
                DocKey::Session { name, date } => Document::new_session_log(name, *date),
            }
        }
    }

    /// Result of loading one document.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Loaded {
        pub document: Document,
        /// Whether a file was found on disk.
        pub existed: bool,
        pub warnings: Vec<ParseWarning>,
        /// Set when the file existed but could not be parsed and a new document was substituted.
        pub recovered_from: Option<ParseError>,
    }

    /* -------------------------------- Vault -------------------------------- */

    #[derive(Debug, Clone)]
    pub struct Vault<S = FsStore> {
        root: PathBuf,
        config: VaultConfig,
        store: S,
    }

    impl Vault<FsStore> {
        /// Creates the folder layout and config under `root`.
        pub fn create(root: impl Into<PathBuf>, name: &str) -> Result<Self> {
            let root = root.into();
            validate_vault_path(&root)?;
            Self::create_with_store(root, name, FsStore)
        }

        pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
            Self::open_with_store(root, FsStore)
        }
    }

    impl<S: VaultStore> Vault<S> {
        pub fn create_with_store(root: impl Into<PathBuf>, name: &str, store: S) -> Result<Self> {
            let root = root.into();
            let mut config = VaultConfig::default();
            if !name.trim().is_empty() {
                config.vault_name = name.trim().to_string();
            }
            config.vault_path = Some(root.clone());
            config.validate()?;
            let vault = Self {
                root,
                config,
                store,
            };
            vault.init_layout()?;
            vault.save_config()?;
            log::info!(
                "[vault] created {:?} at {}",
                vault.config.vault_name,
                vault.root.display()
            );
            Ok(vault)
        }

        /// Opens an existing vault, writing a default config when none is present.
        pub fn open_with_store(root: impl Into<PathBuf>, store: S) -> Result<Self> {
            let root = root.into();
            let config_path = root.join(CONFIG_FILE_NAME);
            let (config, fresh) = match store.load(&config_path)? {
                Some(text) => (
                    VaultConfig::from_json(&text)
                        .with_context(|| format!("loading {:?}", config_path))?,
                    false,
                ),
                None => {
                    let mut config = VaultConfig::default();
                    config.vault_path = Some(root.clone());
                    (config, true)
                }
            };
            let vault = Self {
                root,
                config,
                store,
            };
            vault.init_layout()?;
            if fresh {
                log::debug!("[vault] no config in {}, writing defaults", vault.root.display());
                vault.save_config()?;
            }
            Ok(vault)
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        pub fn config(&self) -> &VaultConfig {
            &self.config
        }

        pub fn store(&self) -> &S {
            &self.store
        }

        pub fn init_layout(&self) -> Result<()> {
            for dir in [POMODORO_DIR, HABITS_DIR, TASKS_DIR] {
                self.store.ensure_dir(&self.root.join(dir))?;
            }
            self.store.ensure_dir(&habit_templates_dir(&self.root))
        }

        pub fn save_config(&self) -> Result<()> {
            let text = self.config.to_json()?;
            self.store.save(&self.root.join(CONFIG_FILE_NAME), &text)
        }

        pub fn path_for(&self, key: &DocKey) -> PathBuf {
            self.root.join(key.relative_path())
        }

        pub fn template_path(&self, habit: &str) -> PathBuf {
            habit_templates_dir(&self.root).join(format!("{}{}", habit, TEMPLATE_SUFFIX))
        }

        /* ------------------------------ Documents ------------------------------ */

        /// Loads the document for `key`. Missing or unparseable files yield a new document.
        pub fn load(&self, key: &DocKey) -> Result<Loaded> {
            if let Some(name) = key.name() {
                validate_name(name)?;
            }
            let template = match key {
                DocKey::Habit { name, .. } => self.load_template(name)?,
                _ => None,
            };
            self.load_with_template(key, template.as_ref())
        }

        /// `load` with the habit template already in hand.
        fn load_with_template(&self, key: &DocKey, template: Option<&HabitTemplate>) -> Result<Loaded> {
            let path = self.path_for(key);
            let Some(text) = self.store.load(&path)? else {
                log::debug!("[vault] {} absent, starting a new {}", path.display(), key.kind());
                return Ok(Loaded {
                    document: key.new_document(template),
                    existed: false,
                    warnings: vec![],
                    recovered_from: None,
                });
            };

            match parse_with_template(&text, key.kind(), template) {
                Ok(parsed) => {
                    log::debug!(
                        "[vault] loaded {} with {} warning(s)",
                        path.display(),
                        parsed.warnings.len()
                    );
                    Ok(Loaded {
                        document: parsed.document,
                        existed: true,
                        warnings: parsed.warnings,
                        recovered_from: None,
                    })
                }
                Err(e) => {
                    log::warn!(
                        "[vault] {} could not be read as a {} ({}); using a new one",
                        path.display(),
                        key.kind(),
                        e
                    );
                    Ok(Loaded {
                        document: key.new_document(template),
                        existed: true,
                        warnings: vec![],
                        recovered_from: Some(e),
                    })
                }
            }
        }

        /// Serializes `doc` and atomically replaces the file for `key`.
        pub fn save(&self, key: &DocKey, doc: &Document) -> Result<PathBuf> {
            if let Some(name) = key.name() {
                validate_name(name)?;
            }
            if doc.kind() != key.kind() {
                bail!("cannot store a {} where a {} belongs", doc.kind(), key.kind());
            }
            let text = serialize(doc);
            let path = self.path_for(key);
            self.store.save(&path, &text)?;
            log::info!("[vault] wrote {} ({} bytes)", path.display(), text.len());
            Ok(path)
        }

        /* -------------------------------- Habits -------------------------------- */

        pub fn list_habits(&self) -> Result<Vec<String>> {
            let mut names: Vec<String> = self
                .store
                .entries(&self.root.join(HABITS_DIR))?
                .into_iter()
                .filter(|e| e.is_dir)
                .filter_map(|e| e.path.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .collect();
            names.sort();
            Ok(names)
        }

        /// Creates the habit folder and its template (unless one exists); returns the
        /// template now in effect.
        pub fn create_habit(&self, name: &str, template: Option<HabitTemplate>) -> Result<HabitTemplate> {
            let name = validate_name(name)?;
            if let Some(template) = &template {
                check_template_fields(template)?;
            }
            self.store.ensure_dir(&self.root.join(HABITS_DIR).join(name))?;
            if let Some(existing) = self.load_template(name)? {
                return Ok(existing);
            }
            let mut template = template.unwrap_or_else(|| HabitTemplate::default_for(name));
            template.name = name.to_string();
            self.save_template(&template)?;
            log::info!("[vault] created habit {:?}", name);
            Ok(template)
        }

        /// `Ok(None)` when the habit has no template or it cannot be parsed.
        pub fn load_template(&self, habit: &str) -> Result<Option<HabitTemplate>> {
            let path = self.template_path(validate_name(habit)?);
            let Some(text) = self.store.load(&path)? else {
                return Ok(None);
            };
            match parse_template(&text) {
                Ok(t) => Ok(Some(t)),
                Err(e) => {
                    log::warn!("[vault] ignoring template {}: {}", path.display(), e);
                    Ok(None)
                }
            }
        }

        pub fn save_template(&self, template: &HabitTemplate) -> Result<()> {
            check_template_fields(template)?;
            let path = self.template_path(validate_name(&template.name)?);
            self.store.save(&path, &render_template(template))
        }

        /// Dates with a log file for `habit`, ascending.
        pub fn habit_dates(&self, habit: &str) -> Result<Vec<NaiveDate>> {
            let habit = validate_name(habit)?;
            let prefix = format!("{}-", habit);
            let mut dates: Vec<NaiveDate> = self
                .store
                .entries(&self.root.join(HABITS_DIR).join(habit))?
                .into_iter()
                .filter(|e| !e.is_dir)
                .filter_map(|e| {
                    let file = e.path.file_name()?.to_str()?.to_string();
                    parse_dated_file_name(&prefix, &file)
                })
                .collect();
            dates.sort_unstable();
            Ok(dates)
        }

        fn habit_log_on(
            &self,
            habit: &str,
            date: NaiveDate,
            template: Option<&HabitTemplate>,
        ) -> Result<Option<HabitLog>> {
            let key = DocKey::Habit {
                name: habit.to_string(),
                date,
            };
            let loaded = self.load_with_template(&key, template)?;
            if !loaded.existed || loaded.recovered_from.is_some() {
                return Ok(None);
            }
            Ok(match loaded.document {
                Document::HabitLog { log, .. } => Some(log),
                _ => None,
            })
        }

        /// One entry per day in `from..=to`; days without a readable log are `None`.
        pub fn habit_history(
            &self,
            habit: &str,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<(NaiveDate, Option<HabitLog>)>> {
            if from > to {
                bail!("history range starts after it ends ({} > {})", from, to);
            }
            let habit = validate_name(habit)?;
            let template = self.load_template(habit)?;
            let mut history = Vec::new();
            for day in from.iter_days().take_while(|d| *d <= to) {
                history.push((day, self.habit_log_on(habit, day, template.as_ref())?));
            }
            Ok(history)
        }

        pub fn habit_streak(&self, habit: &str, from: NaiveDate, to: NaiveDate) -> Result<StreakState> {
            let history = self.habit_history(habit, from, to)?;
            Ok(streak::compute(history.iter().map(|(d, log)| (*d, log.as_ref()))))
        }

        /// Streaks and totals over every completed log of `habit` on disk.
        pub fn habit_stats(&self, habit: &str, today: NaiveDate) -> Result<HabitStats> {
            let habit = validate_name(habit)?;
            let template = self.load_template(habit)?;
            let mut completed = Vec::new();
            for date in self.habit_dates(habit)? {
                if streak::is_completed(self.habit_log_on(habit, date, template.as_ref())?.as_ref()) {
                    completed.push(date);
                }
            }
            Ok(streak::summarize(&completed, today))
        }
    }

}
