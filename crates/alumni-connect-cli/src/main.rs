use std::path::PathBuf;

use alumni_connect_api::{AlumniConnectApi, RegisterUserRequest};
use alumni_connect_core::{IdentityContext, Role, UserId};
use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "ac")]
#[command(about = "Alumni Connect operator CLI")]
struct Cli {
    #[arg(long, default_value = "./alumni_connect.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    Directory {
        #[command(subcommand)]
        command: DirectoryCommand,
    },
    Event {
        #[command(subcommand)]
        command: EventCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Backup(DbBackupArgs),
    Restore(DbRestoreArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbRestoreArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    Add(UserAddArgs),
    Approve(UserApproveArgs),
}

#[derive(Debug, Args)]
struct UserAddArgs {
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: Option<String>,
    #[arg(long)]
    email: String,
    #[arg(long)]
    role: RoleArg,
    #[arg(long)]
    department: Option<String>,
    #[arg(long)]
    branch: Option<String>,
    /// Create alumni already approved. Other roles are always approved.
    #[arg(long, default_value_t = false)]
    approved: bool,
}

#[derive(Debug, Args)]
struct UserApproveArgs {
    #[command(flatten)]
    requester: RequesterArgs,
    #[arg(long)]
    user_id: String,
    #[arg(long, default_value_t = false)]
    revoke: bool,
}

#[derive(Debug, Args)]
struct RequesterArgs {
    /// User id to act as.
    #[arg(long = "as")]
    as_user: String,
}

#[derive(Debug, Subcommand)]
enum DirectoryCommand {
    Alumni(RequesterArgs),
    Students(RequesterArgs),
    Pending(RequesterArgs),
}

#[derive(Debug, Subcommand)]
enum EventCommand {
    List(RequesterArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Student,
    Alumni,
    Professor,
    #[value(name = "collegeadmin")]
    CollegeAdmin,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Student => Self::Student,
            RoleArg::Alumni => Self::Alumni,
            RoleArg::Professor => Self::Professor,
            RoleArg::CollegeAdmin => Self::CollegeAdmin,
            RoleArg::Admin => Self::Admin,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = AlumniConnectApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::User { command } => run_user(command, &api),
        Command::Directory { command } => run_directory(command, &api),
        Command::Event { command } => run_event(command, &api),
    }
}

fn resolve_requester(api: &AlumniConnectApi, args: &RequesterArgs) -> Result<IdentityContext> {
    api.identity(UserId::parse(&args.as_user)?)
}

fn run_db(command: DbCommand, api: &AlumniConnectApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => emit_json(serde_json::to_value(api.migrate(args.dry_run)?)?),
        DbCommand::Backup(args) => {
            api.backup_database(&args.out)?;
            emit_json(serde_json::json!({ "backup_path": args.out, "status": "ok" }))
        }
        DbCommand::Restore(args) => {
            let status = api.restore_database(&args.input)?;
            emit_json(serde_json::json!({
                "restored_from": args.input,
                "current_version": status.current_version,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::IntegrityCheck => emit_json(serde_json::to_value(api.integrity_check()?)?),
    }
}

fn run_user(command: UserCommand, api: &AlumniConnectApi) -> Result<()> {
    match command {
        UserCommand::Add(args) => {
            let role = Role::from(args.role);
            let approved = args.approved || role != Role::Alumni;
            let profile = api.create_user(
                RegisterUserRequest {
                    first_name: args.first_name,
                    last_name: args.last_name,
                    email: args.email,
                    role,
                    department: args.department,
                    branch: args.branch,
                },
                approved,
            )?;
            emit_json(serde_json::to_value(profile)?)
        }
        UserCommand::Approve(args) => {
            let requester = resolve_requester(api, &args.requester)?;
            let user_id = UserId::parse(&args.user_id)?;
            let profile = api.approve_user(&requester, user_id, !args.revoke)?;
            emit_json(serde_json::to_value(profile)?)
        }
    }
}

fn run_directory(command: DirectoryCommand, api: &AlumniConnectApi) -> Result<()> {
    let (key, entries) = match command {
        DirectoryCommand::Alumni(args) => {
            ("alumni", api.list_alumni(&resolve_requester(api, &args)?)?)
        }
        DirectoryCommand::Students(args) => {
            ("students", api.list_students(&resolve_requester(api, &args)?)?)
        }
        DirectoryCommand::Pending(args) => {
            ("pending", api.list_pending_alumni(&resolve_requester(api, &args)?)?)
        }
    };
    let mut object = serde_json::Map::new();
    object.insert("count".to_string(), Value::from(entries.len()));
    object.insert(key.to_string(), serde_json::to_value(entries)?);
    emit_json(Value::Object(object))
}

fn run_event(command: EventCommand, api: &AlumniConnectApi) -> Result<()> {
    match command {
        EventCommand::List(args) => {
            let requester = resolve_requester(api, &args)?;
            let events = api.list_events(&requester)?;
            emit_json(serde_json::json!({ "events": events }))
        }
    }
}
