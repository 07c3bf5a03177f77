//! chat.rs — interactive terminal front-end.
//!
//! Re-expresses the configuration form and chat surface as a line-oriented
//! REPL: meta-commands (`:project`, `:table`, `:init`, ...) configure the
//! session, and any other input while initialized becomes a conversational
//! turn. One user action is in flight at a time.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crate::auth::verify_access;
use crate::error::Result;
use crate::executor::format_rows;
use crate::gemini::{GeminiClient, TextModel};
use crate::logging::{app_error, app_info, app_warn};
use crate::orchestrator::Orchestrator;
use crate::schema::extract_schema;
use crate::session::{Session, TableRef};
use crate::settings::Settings;
use crate::transcript::{self, Turn};
use crate::warehouse::{BigQueryClient, Warehouse};

const EXAMPLE_QUESTIONS: &[&str] = &[
    "How many rows are in each table?",
    "Which stages have the best/worst survival rates?",
    "How many patients were diagnosed with each stage?",
    "Find patients who are over 65 years old with Stage III cancer.",
];

pub struct ChatApp {
    session: Session,
    settings: Settings,
    api_key_override: Option<String>,
    warehouse: Option<BigQueryClient>,
    model: Option<GeminiClient>,
}

impl ChatApp {
    pub fn new(settings: Settings) -> Self {
        ChatApp {
            session: Session::new(),
            settings,
            api_key_override: None,
            warehouse: None,
            model: None,
        }
    }

    /// Main loop: read a line, dispatch a command or run a turn.
    pub async fn run(&mut self) -> Result<()> {
        println!("Tabletalk — ask questions about your BigQuery data in natural language.");
        println!("The assistant generates SQL, executes it, and explains the results.");
        println!("Type :help for commands.\n");

        let stdin = io::stdin();
        loop {
            print!("> ");
            io::stdout().flush().ok();

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(command) = line.strip_prefix(':') {
                if !self.dispatch_command(command).await {
                    break;
                }
            } else {
                self.handle_question(line).await;
            }
        }

        Ok(())
    }

    /// Returns false when the loop should exit.
    async fn dispatch_command(&mut self, command: &str) -> bool {
        let (name, rest) = match command.split_once(' ') {
            Some((name, rest)) => (name, rest.trim()),
            None => (command, ""),
        };

        match name {
            "help" => print_help(),
            "project" => {
                self.session.config.project = rest.to_string();
                println!("Project set to '{}'.", rest);
            }
            "table" => self.command_table(rest),
            "remove" => self.command_remove(rest),
            "tables" => self.print_tables(),
            "key" => {
                self.api_key_override = Some(rest.to_string());
                println!("API key override set (it is safer to use the .env file).");
            }
            "init" => self.command_init().await,
            "schema" => self.print_schema(),
            "examples" => {
                println!("Example questions:");
                for example in EXAMPLE_QUESTIONS {
                    println!("  - {}", example);
                }
            }
            "save" => self.command_save(),
            "chats" => self.command_chats(),
            "load" => self.command_load(rest),
            "reset" => {
                self.session.reset();
                self.warehouse = None;
                self.model = None;
                println!("Session reset. Configure and :init to start a new chat.");
            }
            "quit" | "exit" => return false,
            other => println!("Unknown command ':{}'. Type :help for commands.", other),
        }

        true
    }

    fn command_table(&mut self, rest: &str) {
        let Some((dataset, table)) = rest.split_once('.') else {
            println!("Usage: :table <dataset>.<table>");
            return;
        };

        let entry = TableRef::new(dataset.trim(), table.trim());
        // The form starts with one blank entry; fill it before appending.
        if let Some(first) = self.session.config.tables.first_mut() {
            if first.dataset.is_empty() && first.table.is_empty() {
                *first = entry;
                self.print_tables();
                return;
            }
        }
        self.session.config.tables.push(entry);
        self.print_tables();
    }

    fn command_remove(&mut self, rest: &str) {
        match rest.parse::<usize>() {
            Ok(0) => println!("The first table cannot be removed."),
            Ok(n) if n < self.session.config.tables.len() => {
                self.session.remove_table(n);
                self.print_tables();
            }
            _ => println!("Usage: :remove <index> (see :tables)"),
        }
    }

    fn print_tables(&self) {
        println!("Configured tables:");
        for (i, table) in self.session.config.tables.iter().enumerate() {
            let shown = if table.dataset.is_empty() && table.table.is_empty() {
                "(empty)".to_string()
            } else {
                table.qualified()
            };
            println!("  [{}] {}", i, shown);
        }
    }

    /// Start a new chat: save any existing transcript, validate the
    /// configuration, verify access, fetch schema, bring up the model.
    async fn command_init(&mut self) {
        // Leaving a previous conversation always preserves it first.
        if !self.session.transcript.is_empty() {
            self.command_save();
            self.session.transcript.clear();
        }
        self.session.config.view_only = false;
        self.session.config.initialized = false;

        if let Err(e) = self.session.validate_config() {
            println!("{}", e);
            return;
        }

        let warehouse = match BigQueryClient::new(&self.session.config.project) {
            Ok(client) => client,
            Err(e) => {
                app_error(format!("Warehouse client setup failed: {}", e));
                println!("Error initializing chat: {}", e);
                return;
            }
        };

        println!("Validating access and fetching schema...");
        let check = verify_access(
            &warehouse,
            &self.session.config.project,
            &self.session.config.tables,
        )
        .await;
        if !check.success {
            let reason = check.error.unwrap_or_default();
            app_warn(format!("Access verification failed: {}", reason));
            println!("Access verification failed: {}", reason);
            return;
        }

        match extract_schema(&warehouse, &self.session.config.tables, self.settings.sample_rows).await
        {
            Ok(schema_info) => self.session.schema_info = schema_info,
            Err(e) => {
                println!("{}", e);
                return;
            }
        }

        match GeminiClient::new(&self.settings, self.api_key_override.as_deref()) {
            Ok(model) => self.model = Some(model),
            Err(e) => {
                println!("Failed to initialize the model. {}", e);
                return;
            }
        }

        self.warehouse = Some(warehouse);
        self.session.config.initialized = true;
        app_info("Chat initialized");
        println!("Chat initialized successfully! Ask a question, or :examples for ideas.");
    }

    async fn handle_question(&mut self, question: &str) {
        if self.session.config.view_only {
            println!(
                "This is a loaded chat history. Configure the session and :init to begin a new conversation."
            );
            return;
        }
        if !self.session.can_take_turns() {
            println!("Please configure the session and :init first (:help for details).");
            return;
        }

        // Both clients exist whenever the session is initialized.
        let (Some(warehouse), Some(model)) = (self.warehouse.as_ref(), self.model.as_ref()) else {
            println!("Please configure the session and :init first (:help for details).");
            return;
        };

        println!("Generating response...");
        let orchestrator =
            Orchestrator::new(warehouse as &dyn Warehouse, model as &dyn TextModel, self.settings.max_correction_attempts);
        let outcome = orchestrator
            .process_question(
                &self.session.schema_info,
                &self.session.config.project,
                &self.session.transcript,
                question,
            )
            .await;

        render_turn(&outcome.turn, self.settings.display_rows);
        self.session.transcript.push(Turn::User { text: question.to_string() });
        self.session.transcript.push(outcome.turn);
    }

    fn command_save(&mut self) {
        if self.session.transcript.is_empty() {
            println!("Nothing to save yet.");
            return;
        }

        match transcript::save_transcript(
            Path::new(&self.settings.chats_dir),
            &self.session.config.project,
            &self.session.config.tables,
            &self.session.transcript,
        ) {
            Ok(path) => println!("Chat history saved to {}", path.display()),
            Err(e) => println!("Error saving chat history: {}", e),
        }
    }

    fn command_chats(&self) {
        match transcript::list_transcripts(Path::new(&self.settings.chats_dir)) {
            Ok(files) if files.is_empty() => println!("No previous chats found."),
            Ok(files) => {
                println!("Previous chats:");
                for (i, file) in files.iter().enumerate() {
                    println!("  [{}] {}", i, file.display());
                }
            }
            Err(e) => println!("Error listing chat history files: {}", e),
        }
    }

    fn command_load(&mut self, rest: &str) {
        let path: PathBuf = match rest.parse::<usize>() {
            Ok(index) => {
                match transcript::list_transcripts(Path::new(&self.settings.chats_dir)) {
                    Ok(files) if index < files.len() => files[index].clone(),
                    Ok(_) => {
                        println!("No chat with index {} (see :chats).", index);
                        return;
                    }
                    Err(e) => {
                        println!("Error listing chat history files: {}", e);
                        return;
                    }
                }
            }
            Err(_) if !rest.is_empty() => PathBuf::from(rest),
            Err(_) => {
                println!("Usage: :load <index|path> (see :chats)");
                return;
            }
        };

        match transcript::load_transcript(&path) {
            Ok(loaded) => {
                if let Some(project) = &loaded.project {
                    println!("Project: {}", project);
                }
                if !loaded.tables.is_empty() {
                    let joined: Vec<String> =
                        loaded.tables.iter().map(TableRef::qualified).collect();
                    println!("Tables: {}", joined.join(", "));
                }

                for turn in &loaded.turns {
                    render_turn(turn, self.settings.display_rows);
                }

                // Browsable, but no new turns until the session is
                // re-initialized against live tables.
                self.session.transcript = loaded.turns;
                self.session.config.initialized = false;
                self.session.config.view_only = true;
                println!(
                    "\nLoaded chat history from {}. This transcript is view-only; :init starts a new conversation.",
                    path.display()
                );
            }
            Err(e) => println!("Error loading chat history: {}", e),
        }
    }

    fn print_schema(&self) {
        if self.session.schema_info.is_empty() {
            println!("No schema loaded. Run :init first.");
            return;
        }
        for (name, table) in &self.session.schema_info {
            println!("{} ({} rows)", name, table.num_rows);
            if !table.description.is_empty() {
                println!("  {}", table.description);
            }
            for column in &table.columns {
                println!("  - {} ({})", column.name, column.column_type);
            }
        }
    }
}

/// Print one transcript entry the way the chat surface shows it.
pub fn render_turn(turn: &Turn, display_rows: usize) {
    match turn {
        Turn::Metadata { .. } => {}
        Turn::User { text } => println!("\n[you] {}", text),
        Turn::Assistant { understanding, sql, query_result, explanation, error } => {
            if !understanding.is_empty() {
                println!("\n[assistant] {}", understanding);
            }
            if !sql.is_empty() {
                println!("\n```sql\n{}\n```", sql);
            }
            if let Some(result) = query_result {
                if result.success {
                    println!(
                        "\nQuery executed successfully\n  Rows: {}\n  Execution time: {:.2} ms\n  Bytes processed: {}",
                        result.stats.rows, result.stats.elapsed_ms, result.stats.bytes_processed
                    );
                    if result.rows.is_empty() {
                        println!("The query returned no results.");
                    } else if result.rows.len() > display_rows {
                        println!("Showing first {} of {} rows:", display_rows, result.rows.len());
                        println!("{}", format_rows(&result.columns, &result.rows[..display_rows]));
                    } else {
                        println!("{}", format_rows(&result.columns, &result.rows));
                    }
                }
            }
            if let Some(error) = error {
                println!("\nQuery Error: {}", error);
            }
            if let Some(explanation) = explanation {
                if !explanation.is_empty() {
                    println!("\n{}", explanation);
                }
            }
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :project <id>          set the GCP project id");
    println!("  :table <dataset>.<table>  add a table (first blank entry is filled in place)");
    println!("  :remove <index>        remove a table (the first one cannot be removed)");
    println!("  :tables                list configured tables");
    println!("  :key <api key>         override the GEMINI_API_KEY env var for this session");
    println!("  :init                  verify access, fetch schema, start a new chat");
    println!("  :schema                show the loaded schema");
    println!("  :examples              show example questions");
    println!("  :save                  save the transcript to the chats directory");
    println!("  :chats                 list saved transcripts");
    println!("  :load <index|path>     load a saved transcript (view-only)");
    println!("  :reset                 clear schema/transcript, keep the configuration");
    println!("  :quit                  exit");
    println!("\nAnything else is a question about your data.");
}
