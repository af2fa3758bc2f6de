use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use bamboo::config::{CONFIG_FILE_NAME, VaultConfig, check_break_minutes, check_focus_minutes};
use bamboo::core::{Document, DocumentKind, FieldSpec, HabitTemplate, NodeRef, TaskTree};
use bamboo::editor::validate_field_name;
use bamboo::parser::parse_with_template;
use bamboo::serialize;
use bamboo::storage::{FsStore, VaultStore};
use bamboo::vault::{DocKey, Loaded, Vault};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "bamboo",
    about = "Tasks, habit logs and pomodoro sessions kept as markdown in a vault",
    version
)]
struct Cli {
    /// Vault root. Defaults to the vault named by `.bamboo_config.json` in the
    /// current directory or in $HOME.
    #[arg(long, global = true)]
    vault: Option<PathBuf>,
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a vault with its folder layout and config.
    Init(InitArgs),

    /// Parse a markdown file and print its structure.
    Parse(ParseArgs),

    /// Rewrite files in canonical form.
    Format(FormatArgs),

    /// Show or edit the task list of a day.
    Tasks(TasksArgs),

    /// Manage habits and their daily logs.
    Habit {
        #[command(subcommand)]
        action: HabitAction,
    },

    /// Record and review pomodoro sessions.
    Pomodoro {
        #[command(subcommand)]
        action: PomodoroAction,
    },
}

#[derive(Debug, Args)]
struct InitArgs {
    /// Directory for the new vault.
    path: PathBuf,
    #[arg(long, default_value = "BambooVault")]
    name: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Tasks,
    Habit,
    Session,
}

impl From<KindArg> for DocumentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Tasks => DocumentKind::TaskList,
            KindArg::Habit => DocumentKind::HabitLog,
            KindArg::Session => DocumentKind::SessionLog,
        }
    }
}

#[derive(Debug, Args)]
struct ParseArgs {
    file: PathBuf,
    #[arg(long, value_enum)]
    kind: KindArg,
    /// Emit JSON instead of a debug representation.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct FormatArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,
    #[arg(long, value_enum)]
    kind: KindArg,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct TasksArgs {
    /// Day of the task list (YYYY-MM-DD). Defaults to today.
    #[arg(long, global = true)]
    date: Option<NaiveDate>,
    #[command(subcommand)]
    action: Option<TaskAction>,
}

/// Positions are 1-based, in the order `show` lists tasks.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum TaskAction {
    /// Print the numbered task list.
    Show,
    /// Add a task at the end, after a task, or under a task.
    Add {
        text: String,
        #[arg(long, conflicts_with = "under")]
        after: Option<usize>,
        #[arg(long)]
        under: Option<usize>,
    },
    Toggle {
        position: usize,
    },
    /// Nest a task under the task above it.
    Indent {
        position: usize,
    },
    /// Move a subtask out to follow its parent.
    Unindent {
        position: usize,
    },
    /// Remove a task and its subtasks.
    Delete {
        position: usize,
    },
    Edit {
        position: usize,
        text: String,
    },
}

#[derive(Debug, Subcommand)]
enum HabitAction {
    /// List habits in the vault.
    List,
    /// Create a habit; without --field it gets Duration [minutes] and Notes.
    New {
        name: String,
        #[arg(long = "field", value_name = "NAME[:UNIT]")]
        fields: Vec<String>,
    },
    /// Append values to a day's log.
    Log {
        name: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long = "set", value_name = "FIELD=VALUE", required = true)]
        values: Vec<String>,
    },
    /// Mark a day as completed.
    Done {
        name: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print a day's log.
    Show {
        name: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print current and best streaks.
    Streak {
        name: String,
        #[arg(long)]
        today: Option<NaiveDate>,
    },
}

#[derive(Debug, Subcommand)]
enum PomodoroAction {
    /// Append a finished cycle to a session log.
    Record {
        #[arg(long)]
        session: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Focus minutes. Defaults to the vault setting.
        #[arg(long)]
        focus: Option<u32>,
        /// Break minutes. Defaults to the short or long break from the vault settings.
        #[arg(long = "break")]
        break_minutes: Option<u32>,
        /// The focus period was interrupted.
        #[arg(long)]
        incomplete: bool,
    },
    /// Print a session log.
    Show {
        #[arg(long)]
        session: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let vault = cli.vault;
    match cli.command {
        Commands::Init(args) => handle_init(args),
        Commands::Parse(args) => handle_parse(args),
        Commands::Format(args) => handle_format(args),
        Commands::Tasks(args) => handle_tasks(&open_vault(vault)?, args),
        Commands::Habit { action } => handle_habit(&open_vault(vault)?, action),
        Commands::Pomodoro { action } => handle_pomodoro(&open_vault(vault)?, action),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .try_init();
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/* ------------------------------ Vault lookup ------------------------------ */

/// Vault named by a config file in `dir`, if there is one.
fn vault_from_config_dir(dir: &Path) -> Result<Option<PathBuf>> {
    let Some(text) = FsStore.load(&dir.join(CONFIG_FILE_NAME))? else {
        return Ok(None);
    };
    let config = VaultConfig::from_json(&text)
        .with_context(|| format!("loading {:?}", dir.join(CONFIG_FILE_NAME)))?;
    Ok(Some(config.vault_path.unwrap_or_else(|| dir.to_path_buf())))
}

fn discover_vault_root(
    explicit: Option<PathBuf>,
    cwd: &Path,
    home: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Some(root) = vault_from_config_dir(cwd)? {
        return Ok(root);
    }
    if let Some(home) = home {
        if let Some(root) = vault_from_config_dir(home)? {
            return Ok(root);
        }
    }
    bail!("no vault found; pass --vault or run `bamboo init <path>`")
}

fn open_vault(explicit: Option<PathBuf>) -> Result<Vault> {
    let cwd = std::env::current_dir().context("reading current directory")?;
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let root = discover_vault_root(explicit, &cwd, home.as_deref())?;
    Vault::open(&root).with_context(|| format!("opening vault {:?}", root))
}

/// Unparseable files are reported instead of being replaced by an edited empty document.
fn editable(loaded: Loaded, path: &Path) -> Result<Document> {
    if let Some(err) = loaded.recovered_from {
        bail!("{:?} could not be parsed ({}); fix it by hand first", path, err);
    }
    for w in &loaded.warnings {
        eprintln!("warning: {:?} line {}: {}", path, w.line, w.message);
    }
    Ok(loaded.document)
}

fn stamp_time(doc: &mut Document) {
    doc.header_mut()
        .meta
        .entry("Time".to_string())
        .or_insert_with(|| Local::now().format("%H:%M").to_string());
}

/* -------------------------------- Handlers -------------------------------- */

fn handle_init(args: InitArgs) -> Result<()> {
    let vault = Vault::create(&args.path, &args.name)?;
    println!(
        "Created vault {:?} at {}",
        vault.config().vault_name,
        vault.root().display()
    );
    Ok(())
}

fn read_and_parse(path: &Path, kind: DocumentKind) -> Result<Document> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let parsed =
        parse_with_template(&text, kind, None).with_context(|| format!("parsing {:?}", path))?;
    for w in &parsed.warnings {
        eprintln!("warning: {:?} line {}: {}", path, w.line, w.message);
    }
    Ok(parsed.document)
}

fn handle_parse(args: ParseArgs) -> Result<()> {
    let doc = read_and_parse(&args.file, args.kind.into())?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        println!("{:#?}", doc);
    }
    Ok(())
}

fn handle_format(args: FormatArgs) -> Result<()> {
    let FormatArgs {
        files,
        kind,
        in_place,
    } = args;
    for path in files {
        let formatted = serialize(&read_and_parse(&path, kind.into())?);
        if in_place {
            FsStore.save(&path, &formatted)?;
            log::info!("formatted {}", path.display());
        } else {
            print!("{formatted}");
        }
    }
    Ok(())
}

/* ---------------------------------- Tasks ---------------------------------- */

fn node_at_position(tree: &TaskTree, position: usize) -> Result<NodeRef> {
    position
        .checked_sub(1)
        .and_then(|p| tree.node_at(p))
        .with_context(|| format!("no task at position {} (list has {})", position, tree.len()))
}

fn render_task_list(tree: &TaskTree) -> String {
    let mut out = String::new();
    for (pos, (node, depth)) in tree.flatten().into_iter().enumerate() {
        if let Some(task) = tree.get(node) {
            out.push_str(&format!(
                "{:>3}. {:indent$}[{}] {}\n",
                pos + 1,
                "",
                if task.done { "x" } else { " " },
                task.text,
                indent = depth * 4
            ));
        }
    }
    out
}

/// Applies one edit; returns a confirmation, or `None` when nothing changed.
fn apply_task_action(tree: &mut TaskTree, action: &TaskAction) -> Result<Option<String>> {
    let message = match action {
        TaskAction::Show => return Ok(None),
        TaskAction::Add { text, after, under } => {
            match (after, under) {
                (Some(p), _) => {
                    let anchor = node_at_position(tree, *p)?;
                    tree.insert_sibling_after(anchor, text)?;
                }
                (None, Some(p)) => {
                    let parent = node_at_position(tree, *p)?;
                    tree.append_child(parent, text)?;
                }
                (None, None) => {
                    tree.push_root(text)?;
                }
            }
            format!("Added {:?}", text.trim())
        }
        TaskAction::Toggle { position } => {
            let node = node_at_position(tree, *position)?;
            let done = tree.toggle(node)?;
            format!("Task {} marked {}", position, if done { "done" } else { "open" })
        }
        TaskAction::Indent { position } => {
            tree.indent(node_at_position(tree, *position)?)?;
            format!("Task {} indented", position)
        }
        TaskAction::Unindent { position } => {
            tree.unindent(node_at_position(tree, *position)?)?;
            format!("Task {} unindented", position)
        }
        TaskAction::Delete { position } => {
            let removed = tree.delete(node_at_position(tree, *position)?)?;
            format!("Deleted {} task(s)", removed)
        }
        TaskAction::Edit { position, text } => {
            tree.edit_text(node_at_position(tree, *position)?, text)?;
            format!("Task {} updated", position)
        }
    };
    Ok(Some(message))
}

fn handle_tasks(vault: &Vault, args: TasksArgs) -> Result<()> {
    let key = DocKey::Tasks {
        date: args.date.unwrap_or_else(today),
    };
    let path = vault.path_for(&key);
    let action = args.action.unwrap_or(TaskAction::Show);
    let mut doc = editable(vault.load(&key)?, &path)?;
    let tree = doc
        .tasks_mut()
        .context("task file did not load as a task list")?;

    if let Some(message) = apply_task_action(tree, &action)? {
        vault.save(&key, &doc)?;
        println!("{message}");
        return Ok(());
    }
    match doc.tasks() {
        Some(tree) if !tree.is_empty() => {
            println!("{}", doc.header().title);
            print!("{}", render_task_list(tree));
        }
        _ => println!("No tasks for {}.", key.date()),
    }
    Ok(())
}

/* ---------------------------------- Habits ---------------------------------- */

/// `Name` or `Name:unit`.
fn parse_field_spec(raw: &str) -> Result<FieldSpec> {
    let (name, unit) = match raw.split_once(':') {
        Some((n, u)) => (n.trim(), Some(u.trim()).filter(|u| !u.is_empty())),
        None => (raw.trim(), None),
    };
    if name.is_empty() {
        bail!("field spec {:?} has no name", raw);
    }
    let name = validate_field_name(name)?;
    let unit = unit.map(validate_field_name).transpose()?;
    Ok(FieldSpec::new(name, unit))
}

/// `Field=value`.
fn parse_assignment(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => Ok((field.trim(), value.trim())),
        _ => bail!("expected FIELD=VALUE, got {:?}", raw),
    }
}

fn handle_habit(vault: &Vault, action: HabitAction) -> Result<()> {
    match action {
        HabitAction::List => {
            let habits = vault.list_habits()?;
            if habits.is_empty() {
                println!("No habits yet.");
            }
            for name in habits {
                println!("{name}");
            }
        }
        HabitAction::New { name, fields } => {
            let template = if fields.is_empty() {
                None
            } else {
                let fields = fields
                    .iter()
                    .map(|f| parse_field_spec(f))
                    .collect::<Result<Vec<_>>>()?;
                Some(HabitTemplate {
                    name: name.clone(),
                    fields,
                })
            };
            let template = vault.create_habit(&name, template)?;
            let fields: Vec<&str> = template.fields.iter().map(|f| f.name.as_str()).collect();
            println!("Habit {:?} ready with fields: {}", template.name, fields.join(", "));
        }
        HabitAction::Log { name, date, values } => {
            let key = DocKey::Habit {
                name,
                date: date.unwrap_or_else(today),
            };
            let path = vault.path_for(&key);
            let mut doc = editable(vault.load(&key)?, &path)?;
            let log = doc.habit_mut().context("not a habit log")?;
            for raw in &values {
                let (field, value) = parse_assignment(raw)?;
                log.append_value(field, value)?;
            }
            stamp_time(&mut doc);
            println!("Logged to {}", vault.save(&key, &doc)?.display());
        }
        HabitAction::Done { name, date } => {
            let key = DocKey::Habit {
                name,
                date: date.unwrap_or_else(today),
            };
            let path = vault.path_for(&key);
            let mut doc = editable(vault.load(&key)?, &path)?;
            let newly = doc.habit_mut().context("not a habit log")?.mark_completed();
            if newly {
                stamp_time(&mut doc);
                vault.save(&key, &doc)?;
                println!("Marked {} done.", key.date());
            } else {
                println!("Already done on {}.", key.date());
            }
        }
        HabitAction::Show { name, date } => {
            let key = DocKey::Habit {
                name,
                date: date.unwrap_or_else(today),
            };
            let loaded = vault.load(&key)?;
            if !loaded.existed {
                println!("No log for {}.", key.date());
            } else {
                print!("{}", serialize(&editable(loaded, &vault.path_for(&key))?));
            }
        }
        HabitAction::Streak { name, today: day } => {
            let stats = vault.habit_stats(&name, day.unwrap_or_else(today))?;
            println!("Current streak: {} day(s)", stats.current_streak);
            println!("Best streak: {} day(s)", stats.best_streak);
            println!("Days completed: {}", stats.total_entries);
            match stats.last_logged {
                Some(d) => println!("Last completed: {d}"),
                None => println!("Last completed: never"),
            }
        }
    }
    Ok(())
}

/* --------------------------------- Pomodoro --------------------------------- */

fn handle_pomodoro(vault: &Vault, action: PomodoroAction) -> Result<()> {
    match action {
        PomodoroAction::Record {
            session,
            date,
            focus,
            break_minutes,
            incomplete,
        } => {
            if let Some(minutes) = focus {
                check_focus_minutes(minutes)?;
            }
            if let Some(minutes) = break_minutes {
                check_break_minutes(minutes)?;
            }
            let key = DocKey::Session {
                name: session,
                date: date.unwrap_or_else(today),
            };
            let path = vault.path_for(&key);
            let settings = vault.config().pomodoro();
            let mut doc = editable(vault.load(&key)?, &path)?;
            let log = doc.session_mut().context("not a session log")?;
            let break_minutes = break_minutes
                .or_else(|| log.next_cycle_index().map(|next| settings.break_after(next)))
                .unwrap_or(settings.break_minutes);
            let cycle = log.record_cycle(
                focus.unwrap_or(settings.focus_minutes),
                break_minutes,
                !incomplete,
            )?;
            let total = log.total_focus_minutes;
            vault.save(&key, &doc)?;
            println!(
                "Cycle {}: {} min focus, {} min break (total focus {} min)",
                cycle.cycle_index, cycle.focus_minutes, cycle.break_minutes, total
            );
        }
        PomodoroAction::Show { session, date } => {
            let key = DocKey::Session {
                name: session,
                date: date.unwrap_or_else(today),
            };
            let loaded = vault.load(&key)?;
            if !loaded.existed {
                println!("No session log for {}.", key.date());
            } else {
                print!("{}", serialize(&editable(loaded, &vault.path_for(&key))?));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bamboo::core::ParseError;
    use bamboo::parse;

    const TASKS: &str = "# Tasks - 2025-01-20\n- [ ] Write project proposal\n- [x] Read 30 pages\n    - [x] Chapter 3\n    - [ ] Chapter 4\n- [ ] Workout at 7pm\n";

    fn example_tree() -> TaskTree {
        parse(TASKS, DocumentKind::TaskList)
            .expect("parse example")
            .tasks()
            .cloned()
            .expect("task list")
    }

    #[test]
    fn positions_follow_the_rendered_list() {
        let mut tree = example_tree();
        let rendered = render_task_list(&tree);
        assert!(rendered.contains("  4.     [ ] Chapter 4\n"));
        let msg = apply_task_action(&mut tree, &TaskAction::Indent { position: 5 })
            .expect("indent");
        assert_eq!(msg.as_deref(), Some("Task 5 indented"));
        assert!(render_task_list(&tree).ends_with("  5.     [ ] Workout at 7pm\n"));
    }

    #[test]
    fn add_after_and_under() {
        let mut tree = example_tree();
        apply_task_action(
            &mut tree,
            &TaskAction::Add {
                text: "Chapter 5".into(),
                after: Some(4),
                under: None,
            },
        )
        .expect("add after");
        apply_task_action(
            &mut tree,
            &TaskAction::Add {
                text: "Outline".into(),
                after: None,
                under: Some(1),
            },
        )
        .expect("add under");
        let rendered = render_task_list(&tree);
        assert!(rendered.contains("  2.     [ ] Outline\n"));
        assert!(rendered.contains("  6.     [ ] Chapter 5\n"));
    }

    #[test]
    fn bad_positions_and_edits_fail_cleanly() {
        let mut tree = example_tree();
        let before = tree.clone();
        assert!(apply_task_action(&mut tree, &TaskAction::Toggle { position: 0 }).is_err());
        assert!(apply_task_action(&mut tree, &TaskAction::Delete { position: 9 }).is_err());
        assert!(apply_task_action(&mut tree, &TaskAction::Indent { position: 1 }).is_err());
        assert!(
            apply_task_action(
                &mut tree,
                &TaskAction::Edit {
                    position: 2,
                    text: " ".into()
                }
            )
            .is_err()
        );
        assert_eq!(tree, before);
        assert_eq!(apply_task_action(&mut tree, &TaskAction::Show).expect("show"), None);
    }

    #[test]
    fn field_specs_and_assignments() {
        assert_eq!(
            parse_field_spec("Distance:km").expect("spec"),
            FieldSpec::new("Distance", Some("km"))
        );
        assert_eq!(parse_field_spec("Notes").expect("spec"), FieldSpec::new("Notes", None));
        assert!(parse_field_spec(":km").is_err());
        assert!(parse_field_spec("Pace [fast]:km").is_err());
        assert!(parse_field_spec("Pace:min]km").is_err());
        assert_eq!(
            parse_assignment("Notes = felt good").expect("assignment"),
            ("Notes", "felt good")
        );
        assert!(parse_assignment("no equals").is_err());
    }

    #[test]
    fn discovery_prefers_explicit_then_cwd_then_home() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cwd = tmp.path().join("cwd");
        let home = tmp.path().join("home");
        fs::create_dir_all(&cwd).expect("mkdir cwd");
        fs::create_dir_all(&home).expect("mkdir home");

        assert!(discover_vault_root(None, &cwd, Some(&home)).is_err());

        let mut config = VaultConfig::default();
        config.vault_path = Some(tmp.path().join("vault"));
        fs::write(home.join(CONFIG_FILE_NAME), config.to_json().expect("json"))
            .expect("write home config");
        assert_eq!(
            discover_vault_root(None, &cwd, Some(&home)).expect("home"),
            tmp.path().join("vault")
        );

        fs::write(cwd.join(CONFIG_FILE_NAME), "{}").expect("write cwd config");
        assert_eq!(discover_vault_root(None, &cwd, Some(&home)).expect("cwd"), cwd);

        let explicit = tmp.path().join("elsewhere");
        assert_eq!(
            discover_vault_root(Some(explicit.clone()), &cwd, Some(&home)).expect("explicit"),
            explicit
        );
    }

    #[test]
    fn unparseable_files_are_not_editable() {
        let loaded = Loaded {
            document: Document::new_task_list(today()),
            existed: true,
            warnings: vec![],
            recovered_from: Some(ParseError::MissingHeader),
        };
        assert!(editable(loaded, Path::new("Tasks/Task_x.md")).is_err());
    }

    #[test]
    fn task_edits_persist_through_the_vault() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let vault = Vault::create(tmp.path(), "Test").expect("create vault");
        let date = NaiveDate::from_ymd_opt(2025, 1, 20).expect("date");
        let key = DocKey::Tasks { date };
        fs::write(vault.path_for(&key), TASKS).expect("seed tasks");

        for action in [
            TaskAction::Indent { position: 5 },
            TaskAction::Toggle { position: 1 },
        ] {
            handle_tasks(
                &vault,
                TasksArgs {
                    date: Some(date),
                    action: Some(action),
                },
            )
            .expect("edit tasks");
        }

        let text = fs::read_to_string(vault.path_for(&key)).expect("read back");
        assert_eq!(
            text,
            "# Tasks - 2025-01-20\n- [x] Write project proposal\n- [x] Read 30 pages\n    - [x] Chapter 3\n    - [ ] Chapter 4\n    - [ ] Workout at 7pm\n"
        );
    }

    #[test]
    fn pomodoro_record_uses_vault_settings() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let vault = Vault::create(tmp.path(), "Test").expect("create vault");
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).expect("date");
        for _ in 0..4 {
            handle_pomodoro(
                &vault,
                PomodoroAction::Record {
                    session: "Study".into(),
                    date: Some(date),
                    focus: None,
                    break_minutes: None,
                    incomplete: false,
                },
            )
            .expect("record");
        }
        let key = DocKey::Session {
            name: "Study".into(),
            date,
        };
        let loaded = vault.load(&key).expect("load session");
        let session = loaded.document.session().expect("session").clone();
        assert_eq!(session.cycles.len(), 4);
        assert_eq!(session.cycles[3].break_minutes, 15);
        assert_eq!(session.total_focus_minutes, 100);
    }

    #[test]
    fn pomodoro_record_rejects_out_of_range_minutes() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let vault = Vault::create(tmp.path(), "Test").expect("create vault");
        let date = NaiveDate::from_ymd_opt(2025, 3, 2).expect("date");
        let record = |focus: Option<u32>, break_minutes: Option<u32>| PomodoroAction::Record {
            session: "Study".into(),
            date: Some(date),
            focus,
            break_minutes,
            incomplete: false,
        };
        assert!(handle_pomodoro(&vault, record(Some(u32::MAX), None)).is_err());
        assert!(handle_pomodoro(&vault, record(Some(0), None)).is_err());
        assert!(handle_pomodoro(&vault, record(None, Some(500))).is_err());
        let key = DocKey::Session {
            name: "Study".into(),
            date,
        };
        assert!(!vault.path_for(&key).exists());

        handle_pomodoro(&vault, record(Some(120), Some(60))).expect("record at the limits");
        assert!(vault.path_for(&key).exists());
    }

    #[test]
    fn cli_parses_nested_subcommands() {
        let cli = Cli::try_parse_from(["bamboo", "tasks", "--date", "2025-01-20", "add", "x", "--under", "2"])
            .expect("parse cli");
        match cli.command {
            Commands::Tasks(args) => {
                assert_eq!(args.date, NaiveDate::from_ymd_opt(2025, 1, 20));
                assert_eq!(
                    args.action,
                    Some(TaskAction::Add {
                        text: "x".into(),
                        after: None,
                        under: Some(2)
                    })
                );
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["bamboo", "tasks", "add", "x", "--after", "1", "--under", "2"]).is_err());
    }
}
