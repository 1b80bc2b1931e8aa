mod load;
mod typeahead;
mod update;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

const AFTER_HELP: &str = "\x1b[1mCommon workflows:\x1b[0m
  Load a configured set of tables into a fresh database:
    tabvalid load tables/table.tsv db/

  Insert one new row and see where it routed:
    tabvalid insert-row db/ person \"jdoe\tJane Doe\"

  Get typeahead suggestions for a foreign or enumerated column:
    tabvalid typeahead db/ person role_id mana";

#[derive(Parser)]
#[command(name = "tabvalid")]
#[command(version)]
#[command(about = "Validates and bulk-loads tabular data against a declarative table/column/datatype configuration")]
#[command(after_help = AFTER_HELP)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

const INPUT_OUTPUT: &str = "Input/Output";
const BEHAVIOR: &str = "Behavior";

#[derive(Subcommand)]
pub enum Commands {
    /// Load every configured table into a DuckDB database
    #[command(visible_alias = "l")]
    Load {
        /// Path to the master `table` TSV naming every configured table
        #[arg(help_heading = INPUT_OUTPUT)]
        table_path: PathBuf,

        /// Directory the `valve.duckdb` file is created in
        #[arg(help_heading = INPUT_OUTPUT)]
        db_dir: PathBuf,

        /// Rows per validation chunk
        #[arg(long, default_value_t = crate::scheduler::DEFAULT_CHUNK_SIZE, help_heading = BEHAVIOR)]
        chunk_size: usize,

        /// Show a progress bar over tables loaded
        #[arg(long, help_heading = BEHAVIOR)]
        progress: bool,
    },

    /// Insert one new tab-separated row into a table
    #[command(visible_alias = "ir")]
    InsertRow {
        #[arg(help_heading = INPUT_OUTPUT)]
        db_dir: PathBuf,
        #[arg(help_heading = INPUT_OUTPUT)]
        table_path: PathBuf,
        #[arg(help_heading = INPUT_OUTPUT)]
        table: String,
        /// The new row's values, tab-separated, in column order
        row: String,
    },

    /// Re-validate and overwrite an existing row by its row number
    #[command(visible_alias = "ur")]
    UpdateRow {
        #[arg(help_heading = INPUT_OUTPUT)]
        db_dir: PathBuf,
        #[arg(help_heading = INPUT_OUTPUT)]
        table_path: PathBuf,
        #[arg(help_heading = INPUT_OUTPUT)]
        table: String,
        row_number: u64,
        /// The row's new values, tab-separated, in column order
        row: String,
    },

    /// List typeahead suggestions for one column
    #[command(visible_alias = "ta")]
    Typeahead {
        #[arg(help_heading = INPUT_OUTPUT)]
        db_dir: PathBuf,
        #[arg(help_heading = INPUT_OUTPUT)]
        table_path: PathBuf,
        #[arg(help_heading = INPUT_OUTPUT)]
        table: String,
        column: String,
        /// Substring to filter suggestions by; omit for all values
        matching: Option<String>,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Load { table_path, db_dir, chunk_size, progress } => load::run(table_path, db_dir, chunk_size, progress),
        Commands::InsertRow { db_dir, table_path, table, row } => {
            update::run_insert(db_dir, table_path, table, row)
        }
        Commands::UpdateRow { db_dir, table_path, table, row_number, row } => {
            update::run_update(db_dir, table_path, table, row_number, row)
        }
        Commands::Typeahead { db_dir, table_path, table, column, matching } => {
            typeahead::run(db_dir, table_path, table, column, matching)
        }
    }
}
