//! radnorms CLI
//!
//! Public listing, detail view and admin tooling over the configured
//! backends.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use radnorms::{
    auth::{Session, SignInForm},
    config::{self, Backends},
    error::{AppError, Result},
    form::MeasurementForm,
    guard::{self, GuardDecision, Route},
    models::{Config, ImageUpload},
    search::{SearchPolicy, filter_measurements},
    utils::Debouncer,
    views,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// radnorms - Radiology Normal Values
#[derive(Parser, Debug)]
#[command(
    name = "radnorms",
    version,
    about = "Radiology normal values reference and admin tool"
)]
struct Cli {
    /// Storage directory holding radnorms.toml, data and the session
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List measurements, optionally filtered
    List {
        /// Search query
        #[arg(short, long)]
        query: Option<String>,

        /// Admin table (searches clinical text too)
        #[arg(long)]
        admin: bool,
    },

    /// Read queries from stdin and print debounced results
    Browse {
        #[arg(long)]
        admin: bool,
    },

    /// Show one measurement
    Show { id: String },

    /// Add a new measurement
    Create(FormArgs),

    /// Edit an existing measurement
    Edit {
        id: String,

        #[command(flatten)]
        form: FormArgs,

        /// Drop an image from the record by position (1-based)
        #[arg(long = "remove-image", value_name = "N")]
        remove_images: Vec<usize>,
    },

    /// Delete a measurement and its images
    Delete { id: String },

    /// Sign in and save the session
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Forget the saved session
    SignOut,

    /// Create a local account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,

        /// Also grant the admin privilege
        #[arg(long)]
        admin: bool,
    },

    /// Grant the admin privilege to an account
    GrantAdmin {
        /// Account id
        #[arg(long, conflicts_with = "email", required_unless_present = "email")]
        uid: Option<String>,

        /// Local account email
        #[arg(long)]
        email: Option<String>,
    },

    /// Validate configuration
    Validate,

    /// Show backend and session info
    Info,
}

#[derive(Args, Debug, Default)]
struct FormArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    normal_value: Option<String>,

    /// Comma-separated
    #[arg(long)]
    search_terms: Option<String>,

    /// Comma-separated
    #[arg(long)]
    references: Option<String>,

    /// Image file to upload (repeatable)
    #[arg(long = "image", value_name = "PATH")]
    images: Vec<PathBuf>,

    /// Set an image caption by position (1-based), e.g. `2=Coronal view`
    #[arg(long = "caption", value_name = "N=TEXT", value_parser = parse_caption)]
    captions: Vec<(usize, String)>,
}

fn parse_caption(s: &str) -> std::result::Result<(usize, String), String> {
    let (index, text) = s
        .split_once('=')
        .ok_or_else(|| format!("expected N=TEXT, got '{}'", s))?;
    let index: usize = index
        .trim()
        .parse()
        .map_err(|_| format!("invalid image position '{}'", index))?;
    if index == 0 {
        return Err("image positions start at 1".into());
    }
    Ok((index, text.to_string()))
}

/// Initialize logging based on verbosity flag.
fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Apply command-line values to a form and queue uploads.
async fn fill_form(form: &mut MeasurementForm, args: FormArgs) -> Result<()> {
    let input = &mut form.input;
    if let Some(v) = args.title {
        input.title = v;
    }
    if let Some(v) = args.category {
        input.category = v;
    }
    if let Some(v) = args.description {
        input.description = v;
    }
    if let Some(v) = args.normal_value {
        input.normal_value = v;
    }
    if let Some(v) = args.search_terms {
        input.set_search_terms_text(&v);
    }
    if let Some(v) = args.references {
        input.set_references_text(&v);
    }

    for path in &args.images {
        form.add_upload(ImageUpload::from_path(path).await?);
    }
    for (position, caption) in args.captions {
        if !form.set_caption(position - 1, caption) {
            return Err(AppError::validation("images", format!("no image at position {}", position)));
        }
    }
    Ok(())
}

/// Run the admin guard; anything but `Render` stops the command.
async fn require_admin(backends: &Backends, session: Option<&Session>) -> Result<()> {
    let mut guard = backends.guard();
    match guard.check(session, Route::AdminMeasurements).await {
        GuardDecision::Render => Ok(()),
        GuardDecision::Redirect(route) => {
            let hint = match session {
                None => "sign in first",
                Some(_) => "this account is not an admin",
            };
            log::error!("Access denied ({}); redirect to {}", hint, route);
            Err(AppError::Auth(format!("Admin access required: {}", hint)))
        }
    }
}

async fn submit_form(mut form: MeasurementForm) -> Result<()> {
    match form.submit().await {
        Ok(outcome) => {
            let verb = if outcome.created { "Created" } else { "Updated" };
            println!("{} measurement {} ({} images)", verb, outcome.id, outcome.images.len());
            println!("{}", Route::Detail(outcome.id));
            Ok(())
        }
        Err(AppError::Validation(errors)) => {
            for error in &errors.0 {
                eprintln!("{}: {}", error.field, error.message);
            }
            Err(AppError::Validation(errors))
        }
        Err(e) => {
            eprintln!("{}", form.state());
            Err(e)
        }
    }
}

async fn browse(backends: &Backends, config: &Config, policy: SearchPolicy) -> Result<()> {
    let records = Arc::new(backends.measurements().get_all().await?);
    let debouncer = Debouncer::from_millis(config.search.debounce_ms);
    eprintln!(
        "{} measurements loaded. Type a query per line; EOF to quit.",
        records.len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let ticket = debouncer.ticket();
        let debouncer = debouncer.clone();
        let records = Arc::clone(&records);
        pending.push(tokio::spawn(async move {
            if debouncer.settle(ticket).await {
                let found = filter_measurements(&records, &line, policy);
                let rendered = match policy {
                    SearchPolicy::Public => views::render_listing(&found, &line),
                    SearchPolicy::Admin => views::render_admin_table(&found),
                };
                println!("{}", rendered);
            }
        }));
    }
    futures::future::join_all(pending).await;
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(&cli.storage_dir);
    init_logging(if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    });

    let session_path = config::session_path(&config);
    let session = Session::load(&session_path).await.unwrap_or_else(|e| {
        log::warn!("Ignoring unreadable session {}: {}", session_path.display(), e);
        None
    });
    let backends = Backends::connect(&config, session.as_ref()).await?;
    let service = backends.measurements();

    match cli.command {
        Command::List { query, admin } => {
            let query = query.unwrap_or_default();
            if admin {
                require_admin(&backends, session.as_ref()).await?;
            }
            let records = service.get_all().await?;
            if admin {
                let found = filter_measurements(&records, &query, SearchPolicy::Admin);
                print!("{}", views::render_admin_table(&found));
            } else {
                let found = filter_measurements(&records, &query, SearchPolicy::Public);
                print!("{}", views::render_listing(&found, &query));
            }
        }

        Command::Browse { admin } => {
            let policy = if admin {
                require_admin(&backends, session.as_ref()).await?;
                SearchPolicy::Admin
            } else {
                SearchPolicy::Public
            };
            browse(&backends, &config, policy).await?;
        }

        Command::Show { id } => match service.get_by_id(&id).await? {
            Some(record) => print!("{}", views::render_detail(&record)),
            None => return Err(AppError::not_found(format!("measurement {}", id))),
        },

        Command::Create(args) => {
            require_admin(&backends, session.as_ref()).await?;
            let mut form = MeasurementForm::new(service);
            fill_form(&mut form, args).await?;
            submit_form(form).await?;
        }

        Command::Edit {
            id,
            form: args,
            mut remove_images,
        } => {
            require_admin(&backends, session.as_ref()).await?;
            let record = service
                .get_by_id(&id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("measurement {}", id)))?;

            let mut form = MeasurementForm::for_record(service, &record);
            // Remove from the highest position down.
            remove_images.sort_unstable_by(|a, b| b.cmp(a));
            remove_images.dedup();
            for position in remove_images {
                if position == 0 || form.remove_image(position - 1).is_none() {
                    return Err(AppError::validation(
                        "images",
                        format!("no image at position {}", position),
                    ));
                }
            }
            fill_form(&mut form, args).await?;
            submit_form(form).await?;
        }

        Command::Delete { id } => {
            require_admin(&backends, session.as_ref()).await?;
            let report = service.delete_with_report(&id).await?;
            println!(
                "Deleted measurement {} ({} of {} images removed)",
                id,
                report.images_attempted - report.images_failed,
                report.images_attempted
            );
        }

        Command::SignIn { email, password } => {
            let session = SignInForm::new(email, password)
                .submit(backends.auth.as_ref())
                .await?;
            session.save(&session_path).await?;
            println!("Signed in as {}", session.email);
        }

        Command::SignOut => {
            if Session::clear(&session_path).await? {
                println!("Signed out");
            } else {
                println!("No saved session");
            }
        }

        Command::Register {
            email,
            password,
            admin,
        } => {
            let local_auth = backends.local_auth.as_ref().ok_or_else(|| {
                AppError::config("accounts can only be registered on the local backend")
            })?;
            let account = local_auth.register(&email, &password).await?;
            if admin {
                guard::grant_admin(backends.context.documents.as_ref(), &account.uid).await?;
            }
            println!("Registered {} ({})", account.email, account.uid);
        }

        Command::GrantAdmin { uid, email } => {
            let uid = match (uid, email) {
                (Some(uid), _) => uid,
                (None, Some(email)) => {
                    let local_auth = backends.local_auth.as_ref().ok_or_else(|| {
                        AppError::config("lookup by email needs the local backend; pass --uid")
                    })?;
                    local_auth
                        .uid_for(&email)
                        .await?
                        .ok_or_else(|| AppError::not_found(format!("account {}", email)))?
                }
                (None, None) => return Err(AppError::config("pass --uid or --email")),
            };
            guard::grant_admin(backends.context.documents.as_ref(), &uid).await?;
            println!("Granted admin to {}", uid);
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("Config OK");
        }

        Command::Info => {
            println!("Storage directory: {}", config.storage.root_dir.display());
            println!(
                "Backends: documents={} objects={} auth={}",
                backends.context.documents.backend_tag(),
                backends.context.objects.backend_tag(),
                backends.auth.backend_tag()
            );
            match &session {
                Some(s) => println!("Session: {} ({})", s.email, s.uid),
                None => println!("Session: none"),
            }
            match service.get_all().await {
                Ok(records) => println!("Measurements: {}", records.len()),
                Err(e) => log::warn!("Could not count measurements: {}", e),
            }
        }
    }

    Ok(())
}
