use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::future::try_join_all;
use serde_json::Value;

use listing_desk_lib::session::AUTH_REQUIRED;
use listing_desk_lib::{
    ApiClient, AppError, ClientConfig, EditBuffer, FieldValue, FileCategory, FileSessionStore,
    FileUpload, Mutation, PropertyFilter, ProspectFilter, Record, RecordFilter, RecordId,
    RecordStore, ResourceKind, SessionHandle,
};

const ENV_PASSWORD: &str = "LISTING_DESK_PASSWORD";

#[derive(Debug, Parser)]
#[command(name = "listing-desk", about = "Real-estate back-office client", version)]
struct Cli {
    /// Override the API base URL.
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Override where the session token is kept.
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,
    /// Override the request timeout, in seconds.
    #[arg(
        long,
        global = true,
        value_name = "SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    timeout_secs: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sign in and store the bearer token.
    Login {
        #[arg(long)]
        email: String,
        /// Falls back to LISTING_DESK_PASSWORD.
        #[arg(long)]
        password: Option<String>,
    },
    /// Revoke and forget the stored token.
    Logout,
    /// List records, narrowed by client-side filters.
    List(ListArgs),
    /// Print one record as JSON.
    Show {
        #[arg(value_parser = parse_resource)]
        resource: ResourceKind,
        id: String,
    },
    /// Edit a record: file deletes run immediately, the rest is saved at once.
    Edit {
        #[arg(value_parser = parse_resource)]
        resource: ResourceKind,
        id: String,
        #[command(flatten)]
        changes: ChangeArgs,
        /// Delete a persisted file, `category:position`.
        #[arg(long = "delete", value_parser = parse_position)]
        deletes: Vec<(FileCategory, usize)>,
        /// Replace a persisted file, `category:position=path`.
        #[arg(long = "replace", value_parser = parse_replacement)]
        replacements: Vec<(FileCategory, usize, PathBuf)>,
    },
    /// Create a record from scalar fields and files.
    Create {
        #[arg(value_parser = parse_resource)]
        resource: ResourceKind,
        #[command(flatten)]
        changes: ChangeArgs,
    },
    /// Delete a whole record.
    Delete {
        #[arg(value_parser = parse_resource)]
        resource: ResourceKind,
        id: String,
    },
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(value_parser = parse_resource)]
    resource: ResourceKind,
    #[arg(long, default_value = "")]
    search: String,
    /// Transaction type for properties (`all` disables it).
    #[arg(long)]
    tab: Option<String>,
    #[arg(long)]
    min_price: Option<f64>,
    #[arg(long)]
    max_price: Option<f64>,
    #[arg(long)]
    min_bedrooms: Option<f64>,
    /// Prospect status.
    #[arg(long)]
    status: Option<String>,
    /// Emit a JSON array instead of one line per record.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ChangeArgs {
    /// Set a scalar field, `name=value`.
    #[arg(long = "set", value_parser = parse_assignment)]
    sets: Vec<(String, String)>,
    /// Upload a new file, `category=path`.
    #[arg(long = "add", value_parser = parse_addition)]
    additions: Vec<(FileCategory, PathBuf)>,
}

fn parse_resource(raw: &str) -> Result<ResourceKind, String> {
    raw.parse::<ResourceKind>().map_err(|err| err.to_string())
}

fn parse_category(raw: &str) -> Result<FileCategory, String> {
    raw.parse::<FileCategory>().map_err(|err| err.to_string())
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing field name in `{raw}`"));
    }
    Ok((name.to_string(), value.to_string()))
}

fn parse_addition(raw: &str) -> Result<(FileCategory, PathBuf), String> {
    let (category, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected category=path, got `{raw}`"))?;
    Ok((parse_category(category)?, PathBuf::from(path)))
}

fn parse_position(raw: &str) -> Result<(FileCategory, usize), String> {
    let (category, position) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected category:position, got `{raw}`"))?;
    let position = position
        .trim()
        .parse::<usize>()
        .map_err(|_| format!("invalid position in `{raw}`"))?;
    Ok((parse_category(category)?, position))
}

fn parse_replacement(raw: &str) -> Result<(FileCategory, usize, PathBuf), String> {
    let (target, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected category:position=path, got `{raw}`"))?;
    let (category, position) = parse_position(target)?;
    Ok((category, position, PathBuf::from(path)))
}

fn main() {
    let _guard = match listing_desk_lib::logging::init() {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("logging disabled: {err:#}");
            None
        }
    };

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start runtime: {err}");
            process::exit(1);
        }
    };

    match runtime.block_on(handle_cli(cli)) {
        Ok(code) => process::exit(code),
        Err(err) => {
            report(&err);
            process::exit(1);
        }
    }
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<AppError>() {
        Some(app) => {
            eprintln!("[{}] {}", app.code(), app.message());
            for (field, message) in app.field_errors() {
                eprintln!("  {field}: {message}");
            }
            if app.is_auth() {
                eprintln!("  run `listing-desk login --email <address>` to sign in");
            }
        }
        None => eprintln!("Error: {err:#}"),
    }
}

fn client_for(cli: &Cli) -> Result<ApiClient> {
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &cli.api_url {
        config = config.with_base_url(url)?;
    }
    if let Some(path) = &cli.session_file {
        config = config.with_session_file(path.clone());
    }
    if let Some(secs) = cli.timeout_secs {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    let store = Arc::new(FileSessionStore::new(config.session_file.clone()));
    let session = SessionHandle::restore(store)?;
    Ok(ApiClient::new(&config, session)?)
}

fn require_session(client: &ApiClient) -> Result<()> {
    if client.session().is_active() {
        return Ok(());
    }
    Err(AppError::new(AUTH_REQUIRED, "Sign in first with `listing-desk login`.").into())
}

async fn handle_cli(cli: Cli) -> Result<i32> {
    let client = client_for(&cli)?;
    match cli.command {
        Commands::Login { email, password } => login(&client, &email, password).await,
        Commands::Logout => {
            client.logout().await?;
            println!("Signed out.");
            Ok(0)
        }
        Commands::List(args) => {
            require_session(&client)?;
            list(&client, args).await
        }
        Commands::Show { resource, id } => {
            require_session(&client)?;
            let record = client.fetch(resource, &RecordId::new(id)).await?;
            print_json(&record.to_json())?;
            Ok(0)
        }
        Commands::Edit {
            resource,
            id,
            changes,
            deletes,
            replacements,
        } => {
            require_session(&client)?;
            edit(&client, resource, RecordId::new(id), changes, deletes, replacements).await
        }
        Commands::Create { resource, changes } => {
            require_session(&client)?;
            create(&client, resource, changes).await
        }
        Commands::Delete { resource, id } => {
            require_session(&client)?;
            client.delete_record(resource, &RecordId::new(id.clone())).await?;
            println!("Deleted {} {id}.", resource.path_segment());
            Ok(0)
        }
    }
}

async fn login(client: &ApiClient, email: &str, password: Option<String>) -> Result<i32> {
    let password = match password {
        Some(password) => password,
        None => std::env::var(ENV_PASSWORD)
            .with_context(|| format!("pass --password or set {ENV_PASSWORD}"))?,
    };
    let session = client.login(email, &password).await?;
    let who = session
        .user
        .as_ref()
        .and_then(|user| user.name.clone().or_else(|| user.email.clone()))
        .unwrap_or_else(|| email.to_string());
    println!("Signed in as {who}.");
    Ok(0)
}

async fn list(client: &ApiClient, args: ListArgs) -> Result<i32> {
    let records = client.list(args.resource).await?;
    let filter: Box<dyn RecordFilter> = match args.resource {
        ResourceKind::Prospects => Box::new(ProspectFilter {
            search: args.search,
            status: args.status,
        }),
        _ => Box::new(PropertyFilter {
            search: args.search,
            tab: args.tab,
            min_price: args.min_price,
            max_price: args.max_price,
            min_bedrooms: args.min_bedrooms,
        }),
    };
    let hits = filter.apply(&records);

    if args.json {
        let rows: Vec<Value> = hits.iter().map(|record| record.to_json()).collect();
        print_json(&Value::Array(rows))?;
    } else {
        for record in &hits {
            println!("{}", summary_line(record));
        }
    }
    Ok(0)
}

fn summary_line(record: &Record) -> String {
    let id = record.id.as_ref().map(RecordId::as_str).unwrap_or("-");
    let label = ["title", "name", "first_name", "email"]
        .iter()
        .find_map(|field| record.field(field).and_then(FieldValue::as_text))
        .unwrap_or("");
    format!("{id}\t{label}")
}

fn print_json(value: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("render JSON")?;
    println!("{text}");
    Ok(())
}

async fn read_uploads(paths: &[&Path]) -> Result<Vec<FileUpload>> {
    let uploads = try_join_all(paths.iter().map(|path| async move {
        FileUpload::from_path(path)
            .await
            .map_err(|err| err.with_context("path", path.display().to_string()))
    }))
    .await?;
    Ok(uploads)
}

/// Scalar edits and new files, read from disk and ready to stage.
struct Staged {
    sets: Vec<(String, String)>,
    additions: Vec<(FileCategory, FileUpload)>,
}

async fn read_changes(changes: ChangeArgs) -> Result<Staged> {
    let paths: Vec<&Path> = changes.additions.iter().map(|(_, path)| path.as_path()).collect();
    let uploads = read_uploads(&paths).await?;
    let additions = changes
        .additions
        .iter()
        .map(|(category, _)| *category)
        .zip(uploads)
        .collect();
    Ok(Staged {
        sets: changes.sets,
        additions,
    })
}

async fn stage_changes<S: RecordStore>(
    buffer: &mut EditBuffer<'_, S>,
    staged: Staged,
) -> Result<()> {
    for (name, raw) in staged.sets {
        buffer
            .apply(Mutation::SetScalar {
                name,
                value: FieldValue::parse_input(&raw),
            })
            .await?;
    }
    for (category, file) in staged.additions {
        buffer.apply(Mutation::AddFile { category, file }).await?;
    }
    Ok(())
}

async fn edit(
    client: &ApiClient,
    resource: ResourceKind,
    id: RecordId,
    changes: ChangeArgs,
    mut deletes: Vec<(FileCategory, usize)>,
    replacements: Vec<(FileCategory, usize, PathBuf)>,
) -> Result<i32> {
    let mut buffer = EditBuffer::load(client, resource, &id).await?;
    let staged = read_changes(changes).await?;

    let paths: Vec<&Path> = replacements.iter().map(|(_, _, path)| path.as_path()).collect();
    let uploads = read_uploads(&paths).await?;
    for ((category, position, _), file) in replacements.iter().zip(uploads) {
        buffer
            .apply(Mutation::ReplaceFile {
                category: *category,
                position: *position,
                file,
            })
            .await?;
    }

    // Positions refer to the record as loaded; highest first keeps the
    // lower ones valid, and staged replacements follow their files.
    deletes.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    deletes.dedup();
    for (category, position) in deletes {
        buffer
            .apply(Mutation::DeletePersisted { category, position })
            .await?;
        println!("Deleted {} #{position}.", category.as_str());
    }

    // Additions count against the cap; stage them once the deletes are done.
    stage_changes(&mut buffer, staged).await?;

    if buffer.is_dirty() {
        let saved = buffer.save().await?;
        print_json(&saved.to_json())?;
    } else {
        println!("Nothing to save.");
    }
    Ok(0)
}

async fn create(client: &ApiClient, resource: ResourceKind, changes: ChangeArgs) -> Result<i32> {
    let staged = read_changes(changes).await?;
    let mut buffer = EditBuffer::draft(client, resource);
    stage_changes(&mut buffer, staged).await?;
    let saved = buffer.save().await?;
    print_json(&saved.to_json())?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_replacement_targets() {
        let (category, position, path) = parse_replacement("documents:1=/tmp/plan.pdf").unwrap();
        assert_eq!(category, FileCategory::Documents);
        assert_eq!(position, 1);
        assert_eq!(path, PathBuf::from("/tmp/plan.pdf"));
        assert!(parse_replacement("documents=/tmp/plan.pdf").is_err());
        assert!(parse_position("images:x").is_err());
    }

    #[test]
    fn assignments_keep_equals_in_values() {
        assert_eq!(
            parse_assignment("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_assignment("=1").is_err());
    }

    #[test]
    fn rejects_unknown_resources() {
        assert!(parse_resource("garages").is_err());
        assert_eq!(parse_resource("properties").unwrap(), ResourceKind::Properties);
    }
}
