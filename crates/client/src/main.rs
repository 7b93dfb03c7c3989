//! Taskboard client - command line entry point
//!
//! A thin shell over the sync core: every command goes through the same
//! hooks a UI would use, so token refresh and cache updates behave alike.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use taskboard_client::hooks::{CommentsHook, ProjectsHook, QueryState, TasksHook};
use taskboard_client::shared::{CreateTaskInput, ProjectPatch, ProjectStatus, TaskStatus, User};
use taskboard_client::{logging, operations, ClientConfig, SyncClient};

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(about = "Command line client for the taskboard GraphQL API")]
struct Cli {
    /// GraphQL endpoint; overrides TASKBOARD_API_URL.
    #[arg(long)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Login {
        email: String,
        password: String,
    },
    Logout,
    /// Show the logged-in user and token expiry.
    Me,
    Projects,
    Tasks {
        project_id: String,
    },
    Comments {
        task_id: String,
    },
    CreateProject {
        name: String,
        description: Option<String>,
    },
    SetProjectStatus {
        project_id: String,
        /// ACTIVE, COMPLETED or ARCHIVED
        status: String,
    },
    CreateTask {
        project_id: String,
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        /// Calendar date, YYYY-MM-DD
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    Comment {
        task_id: String,
        content: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("taskboard_client=info");
    let cli = Cli::parse();

    let mut config = ClientConfig::from_env().context("Invalid client configuration")?;
    if let Some(url) = &cli.api_url {
        config = ClientConfig {
            api_url: ClientConfig::new(url)?.api_url,
            ..config
        };
    }
    let client = SyncClient::from_config(&config).context("Failed to open credential store")?;
    client.on_reauth(|| {
        eprintln!("Session expired. Run `taskboard login <email> <password>` to sign in again.")
    });

    match cli.command {
        Command::Login { email, password } => {
            let user = client.login(&email, &password).await?;
            println!("Logged in as {}", user.email);
        }
        Command::Logout => {
            client.logout();
            println!("Logged out");
        }
        Command::Me => {
            let user: User = client
                .fetch(&operations::me())
                .await?
                .decode()
                .context("Unexpected user payload")?;
            let org = user.organization.as_ref().map(|o| o.name.as_str()).unwrap_or("-");
            println!("{}\t{}\t{}", user.id, user.email, org);
            let claims = client.verify_session().await?;
            if let Some(at) = claims.expires_at() {
                println!("token expires {at}");
            }
        }
        Command::Projects => {
            let mut hook = ProjectsHook::new(&client);
            ensure_loaded(hook.fetch().await, "Failed to load projects")?;
            for project in hook.projects() {
                println!("{}\t{}\t{}", project.id, project.status.as_str(), project.name);
            }
        }
        Command::Tasks { project_id } => {
            let mut hook = TasksHook::new(&client, project_id);
            ensure_loaded(hook.fetch().await, "Failed to load tasks")?;
            for task in hook.tasks() {
                let assignee = task.assignee.as_ref().map(|a| a.email.as_str()).unwrap_or("-");
                println!("{}\t{}\t{}\t{}", task.id, task.status.as_str(), assignee, task.title);
            }
        }
        Command::Comments { task_id } => {
            let mut hook = CommentsHook::new(&client, task_id);
            ensure_loaded(hook.fetch().await, "Failed to load comments")?;
            for comment in hook.comments() {
                let author = comment.author.as_ref().map(|a| a.email.as_str()).unwrap_or("-");
                println!("{}\t{}\t{}", comment.id, author, comment.content);
            }
        }
        Command::CreateProject { name, description } => {
            let project = ProjectsHook::new(&client)
                .create_project(&name, description.as_deref())
                .await?;
            println!("Created project {} ({})", project.name, project.id);
        }
        Command::SetProjectStatus { project_id, status } => {
            let patch = ProjectPatch {
                status: Some(ProjectStatus::from(status.to_uppercase().as_str())),
                ..ProjectPatch::default()
            };
            let project = ProjectsHook::new(&client)
                .update_project(&project_id, &patch)
                .await?;
            println!("{} is now {}", project.name, project.status.as_str());
        }
        Command::CreateTask {
            project_id,
            title,
            description,
            status,
            assignee,
            due,
        } => {
            let input = CreateTaskInput {
                title,
                description,
                status: status.map(|s| TaskStatus::from(s.to_uppercase().as_str())),
                assignee_email: assignee,
                due_date: due,
            };
            let task = TasksHook::new(&client, project_id).create_task(&input).await?;
            println!("Created task {} ({})", task.title, task.id);
        }
        Command::Comment { task_id, content } => {
            let comment = CommentsHook::new(&client, task_id).add_comment(&content).await?;
            println!("Added comment {}", comment.id);
        }
    }
    Ok(())
}

fn ensure_loaded<T>(state: &QueryState<T>, fallback: &str) -> Result<()> {
    match &state.error {
        Some(e) => Err(anyhow!(e.user_message(fallback))),
        None => Ok(()),
    }
}
