use anyhow::{Result, bail};
use argh::FromArgs;
use inkpost::posts::PostRepository;
use inkpost::site::{Context, display_date};
use inkpost::{config::Config, serve};
use std::num::NonZero;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// A Markdown blog generator.
struct Args {
    /// show debug logging
    #[argh(switch, short = 'v')]
    verbose: bool,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Build(BuildArgs),
    Serve(ServeArgs),
    List(ListArgs),
    Show(ShowArgs),
}

#[derive(FromArgs)]
/// Render the whole site to a directory.
#[argh(subcommand, name = "build")]
struct BuildArgs {
    /// site directory (default: .)
    #[argh(option, short = 's', default = "PathBuf::from(\".\")")]
    site: PathBuf,

    /// output directory (default: _public)
    #[argh(option, short = 'o', default = "PathBuf::from(\"_public\")")]
    out: PathBuf,

    /// number of rendering threads
    #[argh(option, short = 'j')]
    threads: Option<NonZero<usize>>,

    /// include draft posts
    #[argh(switch)]
    drafts: bool,
}

#[derive(FromArgs)]
/// Preview the site with live reload.
#[argh(subcommand, name = "serve")]
struct ServeArgs {
    /// site directory (default: .)
    #[argh(option, short = 's', default = "PathBuf::from(\".\")")]
    site: PathBuf,

    /// port to listen on (default: 3000)
    #[argh(option, short = 'p', default = "3000")]
    port: u16,

    /// hide draft posts, as a real build would
    #[argh(switch)]
    production: bool,
}

#[derive(FromArgs)]
/// List posts, newest first.
#[argh(subcommand, name = "list")]
struct ListArgs {
    /// site directory (default: .)
    #[argh(option, short = 's', default = "PathBuf::from(\".\")")]
    site: PathBuf,

    /// include draft posts
    #[argh(switch)]
    drafts: bool,
}

#[derive(FromArgs)]
/// Show one post's metadata and outline.
#[argh(subcommand, name = "show")]
struct ShowArgs {
    /// the post id (its filename without extension)
    #[argh(positional)]
    id: String,

    /// site directory (default: .)
    #[argh(option, short = 's', default = "PathBuf::from(\".\")")]
    site: PathBuf,
}

fn open_posts(site: &Path, production: bool) -> Result<PostRepository> {
    let config = Config::load(site)?;
    Ok(PostRepository::open(site.join(&config.posts_dir), production)?)
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Build(args) => {
            let ctx = Context::new(&args.site, !args.drafts, false)?;
            ctx.render_site(args.threads, &args.out)
        }
        Command::Serve(args) => {
            let ctx = Context::new(&args.site, args.production, true)?;
            serve::serve(ctx, args.port)
        }
        Command::List(args) => {
            for post in open_posts(&args.site, !args.drafts)?.list_posts() {
                println!(
                    "{}  {}  {}",
                    display_date(&post.frontmatter.date),
                    post.id,
                    post.frontmatter.title
                );
            }
            Ok(())
        }
        Command::Show(args) => {
            let Some(post) = open_posts(&args.site, false)?.get_post(&args.id)? else {
                bail!("no post named {:?}", args.id);
            };
            println!("{}", post.frontmatter.title);
            println!("{}", display_date(&post.frontmatter.date));
            if let Some(summary) = &post.frontmatter.summary {
                println!("{summary}");
            }
            for (key, value) in &post.frontmatter.extra {
                println!("{key}: {}", serde_yaml::to_string(value)?.trim_end());
            }
            if !post.headings.is_empty() {
                println!();
            }
            for heading in &post.headings {
                let indent = "  ".repeat(usize::from(heading.level.saturating_sub(1)));
                println!("{indent}{} (#{})", heading.text, heading.id);
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();

    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
