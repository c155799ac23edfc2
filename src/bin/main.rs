use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;
use todo_server::config::{DEFAULT_LOOKUP_TIMEOUT_SECS, DEFAULT_TOKEN_TTL_MINUTES};
use todo_server::{
    AuthSettings, DatabaseConfig, NewUser, SecretKey, UserRole, UserStore, create_app_state,
    create_router,
};

#[derive(Parser)]
#[command(name = "todo-server")]
#[command(about = "Multi-user todo server: accounts, login and session tokens")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every command that issues or checks tokens.
#[derive(Args)]
struct AuthArgs {
    /// HS256 signing secret (at least 32 bytes)
    #[arg(long, env = "TODO_SECRET_KEY", hide_env_values = true)]
    secret_key: String,
    /// Lifetime of issued tokens, in minutes
    #[arg(long, env = "TODO_TOKEN_TTL_MINUTES", default_value_t = DEFAULT_TOKEN_TTL_MINUTES)]
    token_ttl_minutes: u64,
    /// Upper bound on a credential store lookup, in seconds
    #[arg(long, env = "TODO_LOOKUP_TIMEOUT_SECS", default_value_t = DEFAULT_LOOKUP_TIMEOUT_SECS)]
    lookup_timeout_secs: u64,
}

impl AuthArgs {
    fn into_settings(self) -> Result<AuthSettings> {
        let secret_key = SecretKey::new(self.secret_key)?;
        AuthSettings::new(secret_key)
            .with_token_ttl_minutes(self.token_ttl_minutes)?
            .with_lookup_timeout_secs(self.lookup_timeout_secs)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Bind address, e.g. 0.0.0.0:8000
        #[arg(long, env = "TODO_BIND", default_value = "127.0.0.1:8000")]
        bind: String,
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Initialize the database
    Init {
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
    },
    /// Create a user with the admin role
    CreateAdmin {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        phone: Option<String>,
        /// Password for the new account
        #[arg(long, env = "TODO_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Change the role of an existing user
    SetRole {
        username: String,
        /// `user` or `admin`
        role: UserRole,
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
    },
    /// Print the Argon2 digest of a password
    HashPassword {
        #[arg(long, env = "TODO_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

fn db_config(url: String) -> DatabaseConfig {
    DatabaseConfig {
        url,
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("todo_server=info".parse()?)
                .add_directive("surrealdb=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, db_url, auth } => {
            let settings = auth.into_settings()?;
            let db_config = db_config(db_url);
            info!("Using database url for server: {}", db_config.url);

            let state = create_app_state(db_config, &settings).await?;
            let app = create_router(state);

            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("Server listening on http://{}", bind);

            axum::serve(listener, app).await?;
        }
        Commands::Init { db_url } => {
            let db_config = db_config(db_url);
            info!("Using database url for initialization: {}", db_config.url);

            info!("Initializing database...");
            let db = todo_server::create_connection(db_config).await?;
            todo_server::ensure_schema(&db).await?;
            info!("Database initialized successfully");
        }
        Commands::CreateAdmin {
            username,
            email,
            first_name,
            last_name,
            phone,
            password,
            db_url,
            auth,
        } => {
            let settings = auth.into_settings()?;
            let state = create_app_state(db_config(db_url), &settings).await?;

            let new_user = NewUser {
                username,
                email,
                first_name,
                last_name,
                password,
                phone_number: phone,
                role: None,
            };

            let admin = state
                .authenticator
                .provision(new_user, UserRole::Admin)
                .await?;

            println!("Admin user created successfully!");
            println!();
            println!("  Id:       {}", admin.id);
            println!("  Username: {}", admin.username);
            println!("  Email:    {}", admin.email);
        }
        Commands::SetRole {
            username,
            role,
            db_url,
        } => {
            let db = todo_server::create_connection(db_config(db_url)).await?;
            todo_server::ensure_schema(&db).await?;

            let users = UserStore::new(db);
            if users.set_role(&username, role).await? {
                info!(username = %username, role = %role, "Role changed");
                println!("User '{}' now has role '{}'.", username, role);
            } else {
                warn!(username = %username, "Role change for unknown user");
                return Err(anyhow!("No user found with username '{}'", username));
            }
        }
        Commands::HashPassword { password } => {
            let digest = todo_server::auth::hash_password(&password)?;
            println!("{}", digest);
        }
    }

    Ok(())
}
