use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::process::ExitCode;

use alumni::api::{ApiClient, CommentBackend};
use alumni::auth::Session;
use alumni::config::ConfigManager;
use alumni::logging::{self, LogConfig};
use alumni::notice::NoticeLevel;
use alumni::storage::FileStorageAdapter;
use alumni::{DeleteOutcome, NodeId, RowKind, ThreadController, ThreadResult};
use alumni_types::{LikeableType, ParentRef, ParentType};

/// Alumni - read and take part in portal comment threads from the terminal
#[derive(Parser)]
#[command(name = "alumni")]
#[command(about = "Nested comment threads for alumni portal posts and gallery items")]
#[command(version)]
struct Cli {
    /// API base URL to connect to
    #[arg(long, short, global = true, env = "ALUMNI_API_URL")]
    server: Option<String>,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the comment threads of a post or gallery item
    Show {
        #[arg(value_parser = parse_parent_type)]
        parent_type: ParentType,
        id: i64,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        limit: Option<u32>,
        /// Expand every reply down to the depth limit
        #[arg(long)]
        expand: bool,
    },
    /// Post a new comment
    Comment {
        #[arg(value_parser = parse_parent_type)]
        parent_type: ParentType,
        id: i64,
        content: String,
    },
    /// Reply to a comment, or to one of its replies with --to
    Reply {
        #[arg(value_parser = parse_parent_type)]
        parent_type: ParentType,
        id: i64,
        comment_id: i64,
        #[arg(long)]
        to: Option<i64>,
        content: String,
    },
    /// Replace the text of your comment or reply
    Edit {
        #[arg(value_parser = parse_parent_type)]
        parent_type: ParentType,
        id: i64,
        target: Target,
        target_id: i64,
        content: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Delete a comment or reply (asks for confirmation)
    Delete {
        #[arg(value_parser = parse_parent_type)]
        parent_type: ParentType,
        id: i64,
        target: Target,
        target_id: i64,
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Like or unlike a post, gallery item, comment or reply
    Like {
        #[arg(value_parser = parse_likeable_type)]
        likeable_type: LikeableType,
        id: i64,
    },
    /// Sign in with a session token issued by the portal
    Login { token: String },
    /// Forget the stored session
    Logout,
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Comment,
    Reply,
}

impl Target {
    fn node(self, id: i64) -> NodeId {
        match self {
            Target::Comment => NodeId::Comment(id),
            Target::Reply => NodeId::Reply(id),
        }
    }
}

fn parse_parent_type(s: &str) -> Result<ParentType, String> {
    ParentType::parse(s).ok_or_else(|| format!("expected post or gallery, got '{}'", s))
}

fn parse_likeable_type(s: &str) -> Result<LikeableType, String> {
    LikeableType::parse(s).ok_or_else(|| format!("expected post, gallery, comment or reply, got '{}'", s))
}

// Load environment variables from .env file
// This allows ALUMNI_API_URL to be set without command-line args
fn load_env() {
    let _ = dotenv::dotenv();
}

fn prompt_yes_no(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    let _ = io::stdout().flush();

    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Print and clear pending notices; errors go to stderr.
fn flush_notices<B: CommentBackend>(controller: &mut ThreadController<B>) {
    for notice in controller.notices_mut().drain() {
        match notice.level {
            NoticeLevel::Error => eprintln!("{}", notice.message),
            NoticeLevel::Info | NoticeLevel::Success => println!("{}", notice.message),
        }
    }
}

/// Expand everything reachable, one level per pass.
async fn expand_all<B: CommentBackend>(controller: &mut ThreadController<B>) {
    loop {
        let pending: Vec<NodeId> = controller
            .rows()
            .iter()
            .filter(|row| row.kind == RowKind::Node)
            .filter(|row| !row.node.expanded && (row.node.reply_count > 0 || !row.node.children.is_empty()))
            .map(|row| row.node.id)
            .collect();
        if pending.is_empty() {
            break;
        }
        for id in pending {
            let _ = controller.expand(id).await;
        }
    }
}

fn render<B: CommentBackend>(controller: &ThreadController<B>) {
    println!(
        "{}: page {} of {} ({} comments)",
        controller.parent(),
        controller.page(),
        controller.total_pages(),
        controller.total_items()
    );

    for row in controller.rows() {
        let indent = "  ".repeat(row.level as usize);
        let node = row.node;
        match row.kind {
            RowKind::Node => {
                let likes = controller.like_status(node.id).map_or(0, |s| s.like_count);
                let liked = controller.like_status(node.id).is_some_and(|s| s.is_liked);
                println!(
                    "{}[{}] {} on {} | {} like{}{}",
                    indent,
                    node.id,
                    node.author.name,
                    node.created_at.format("%Y-%m-%d %H:%M"),
                    likes,
                    if likes == 1 { "" } else { "s" },
                    if liked { " (liked)" } else { "" }
                );
                for line in node.content.lines() {
                    println!("{}  {}", indent, line);
                }
                if !node.expanded && node.reply_count > 0 {
                    println!(
                        "{}  ({} repl{})",
                        indent,
                        node.reply_count,
                        if node.reply_count == 1 { "y" } else { "ies" }
                    );
                }
            }
            RowKind::Loading => println!("{}Loading replies...", indent),
            RowKind::Failed(message) => println!("{}{} (try again)", indent, message),
            RowKind::MaxDepthReached => println!("{}Maximum depth reached", indent),
        }
    }
}

fn exit_code<T>(result: &ThreadResult<T>) -> ExitCode {
    if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env before clap reads ALUMNI_API_URL
    load_env();
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::minimal()
    };
    logging::init_logging(&log_config)?;

    let config_manager = ConfigManager::new()?;
    let config = config_manager.load()?;
    let api_url = config_manager.determine_api_url(cli.server)?;
    log::info!("Using API at {}", api_url);

    let mut client = ApiClient::new(api_url).with_log_config(log_config.clone());
    let storage = Box::new(FileStorageAdapter::new().context("Failed to open session storage")?);
    let mut session = Session::hydrate(storage, &mut client).await?;

    let open = |parent: ParentRef, session: Session, client: ApiClient| {
        ThreadController::new(client, session, parent, config.clone()).with_log_config(log_config.clone())
    };

    let code = match cli.command {
        Command::Login { token } => match session.login(token, &mut client).await {
            Ok(user) => {
                println!("Logged in as {} ({})", user.name, user.role.as_str());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Authentication Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
        Command::Logout => {
            session.logout(&mut client)?;
            println!("Logged out");
            ExitCode::SUCCESS
        }
        Command::Show {
            parent_type,
            id,
            page,
            limit,
            expand,
        } => {
            let mut config = config.clone();
            if let Some(limit) = limit {
                config.page_limit = limit;
            }
            let mut controller = ThreadController::new(client, session, ParentRef::new(parent_type, id), config)
                .with_log_config(log_config.clone());
            let result = controller.load_comments(page).await;
            if result.is_ok() {
                if expand {
                    expand_all(&mut controller).await;
                }
                render(&controller);
            }
            flush_notices(&mut controller);
            exit_code(&result)
        }
        Command::Comment {
            parent_type,
            id,
            content,
        } => {
            let mut controller = open(ParentRef::new(parent_type, id), session, client);
            let result = controller.create_comment(&content).await;
            if let Ok(comment) = &result {
                println!("Created comment {}", comment.id);
            }
            flush_notices(&mut controller);
            exit_code(&result)
        }
        Command::Reply {
            parent_type,
            id,
            comment_id,
            to,
            content,
        } => {
            let mut controller = open(ParentRef::new(parent_type, id), session, client);
            if to.is_some() {
                // Materialize the branch so the depth limit can be checked locally
                if controller.load_comments(1).await.is_ok() {
                    expand_all(&mut controller).await;
                }
                controller.notices_mut().drain();
            }
            let result = controller.create_reply(comment_id, to, &content).await;
            if let Ok(reply) = &result {
                println!("Created reply {}", reply.id);
            }
            flush_notices(&mut controller);
            exit_code(&result)
        }
        Command::Edit {
            parent_type,
            id,
            target,
            target_id,
            content,
            page,
        } => {
            let node = target.node(target_id);
            let mut controller = open(ParentRef::new(parent_type, id), session, client);
            let mut result = controller.load_comments(page).await;
            if result.is_ok() {
                expand_all(&mut controller).await;
                result = controller.begin_edit(node);
            }
            if result.is_ok() {
                result = controller.set_draft(node, content);
            }
            if result.is_ok() {
                result = controller.submit_edit(node).await;
            }
            flush_notices(&mut controller);
            exit_code(&result)
        }
        Command::Delete {
            parent_type,
            id,
            target,
            target_id,
            page,
            yes,
        } => {
            let node = target.node(target_id);
            let mut controller = open(ParentRef::new(parent_type, id), session, client);
            let mut result = controller.load_comments(page).await.map(|_| DeleteOutcome::Cancelled);
            if result.is_ok() {
                expand_all(&mut controller).await;
                result = if yes {
                    controller.delete(node, &mut |_: &str| true).await
                } else {
                    controller.delete(node, &mut prompt_yes_no).await
                };
            }
            if let Ok(DeleteOutcome::Cancelled) = result {
                println!("Nothing deleted");
            }
            flush_notices(&mut controller);
            exit_code(&result)
        }
        Command::Like { likeable_type, id } => {
            // Like state is per item; the page context is not consulted
            let parent = ParentRef::new(ParentType::Post, 0);
            let mut controller = open(parent, session, client);
            let result = controller.toggle_like(likeable_type, id).await;
            if let Ok(status) = &result {
                println!(
                    "{} {} {} ({} likes)",
                    if status.is_liked { "Liked" } else { "Unliked" },
                    likeable_type.as_str(),
                    id,
                    status.like_count
                );
            }
            flush_notices(&mut controller);
            exit_code(&result)
        }
    };

    Ok(code)
}
