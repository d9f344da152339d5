//! Story commands: `branchyard story new|list|show|rm|edit|drop-branch`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::super::{Cli, StoryCommands};
use super::project::{load_config, open_stories};
use branchyard::config::Config;
use branchyard::snapshot::save_stories;
use branchyard::story::{
    Component, IssueRef, LevelCatalog, Selection, SelectionSet, Story, StoryStore,
};
use branchyard::ui::icons::{BRANCH, CHECK, TAG};

pub fn cmd_story(project_dir: &Path, cli: &Cli, command: StoryCommands) -> Result<()> {
    let config = load_config(project_dir, cli)?;
    let mut store = open_stories(&config)?;

    match command {
        StoryCommands::New {
            issue,
            base,
            selections,
        } => story_new(&config, &mut store, &issue, base.as_deref(), &selections),
        StoryCommands::List { search } => {
            story_list(&store, search.as_deref());
            Ok(())
        }
        StoryCommands::Show { story } => {
            let story = find(&store, &story)?;
            print_story(story);
            Ok(())
        }
        StoryCommands::Rm { story, force } => story_rm(&config, &mut store, &story, force),
        StoryCommands::Edit {
            story,
            index,
            tag,
            name,
            base,
            created,
        } => {
            let id = find(&store, &story)?.id;
            if tag.is_none() && name.is_none() && base.is_none() && created.is_none() {
                anyhow::bail!("Nothing to change. Pass --tag, --name, --base or --created.");
            }
            if let Some(tag) = tag {
                store.update_branch_tag(id, index, &tag)?;
            }
            if let Some(name) = name {
                store.update_branch_name(id, index, &name)?;
            }
            if let Some(base) = base {
                store.update_base_branch(id, index, &base)?;
            }
            if let Some(created) = created {
                store.set_branch_created(id, index, created)?;
            }
            save_stories(&config.stories_file(), store.stories())?;
            println!("{}Updated branch {}", CHECK, index);
            if let Some(story) = store.get(id) {
                print_story(story);
            }
            Ok(())
        }
        StoryCommands::DropBranch { story, index } => {
            let id = find(&store, &story)?.id;
            store.delete_branch(id, index)?;
            save_stories(&config.stories_file(), store.stories())?;
            println!("{}Branch {} will no longer be built", CHECK, index);
            Ok(())
        }
    }
}

fn find<'a>(store: &'a StoryStore, key: &str) -> Result<&'a Story> {
    store
        .find(key)
        .with_context(|| format!("No story matches '{}'. Run 'branchyard story list'.", key))
}

fn story_new(
    config: &Config,
    store: &mut StoryStore,
    issue: &str,
    base: Option<&str>,
    selections: &[String],
) -> Result<()> {
    let issue = match base {
        Some(base) => IssueRef::new(issue.trim(), base.trim()),
        None => issue.parse::<IssueRef>()?,
    };

    let mut set = SelectionSet::new();
    for raw in selections {
        set.toggle(raw.parse::<Selection>()?);
    }
    if set.is_empty() && console::user_attended() {
        set = prompt_selections(&config.level_catalog())?;
    }

    let story = store.add_story(issue, set.into_vec())?.clone();
    save_stories(&config.stories_file(), store.stories())?;

    println!("{}Created story {}", CHECK, style(&story.topic).green().bold());
    print_story(&story);
    Ok(())
}

/// Checkbox prompt over every (level, feature, component) in the catalog.
fn prompt_selections(catalog: &LevelCatalog) -> Result<SelectionSet> {
    use dialoguer::MultiSelect;

    let options: Vec<Selection> = catalog
        .levels
        .iter()
        .flat_map(|spec| {
            (1..=spec.features).flat_map(move |feature| {
                Component::ALL
                    .into_iter()
                    .map(move |component| Selection::new(spec.level, feature, component))
            })
        })
        .collect();
    let labels: Vec<String> = options.iter().map(|s| s.to_string()).collect();

    let chosen = MultiSelect::new()
        .with_prompt("Select branches to create (space to toggle)")
        .items(&labels[..])
        .interact()?;

    Ok(chosen.into_iter().map(|i| options[i]).collect())
}

fn story_list(store: &StoryStore, search: Option<&str>) {
    let stories: Vec<&Story> = match search {
        Some(query) => store.search(query),
        None => store.stories().iter().collect(),
    };

    if stories.is_empty() {
        println!("No stories found.");
        return;
    }

    println!(
        "{:<10} {:<40} {:<8} {:<8} {:>8}",
        "ID", "Topic", "Base", "Tag", "Branches"
    );
    println!(
        "{:<10} {:<40} {:<8} {:<8} {:>8}",
        "--", "-----", "----", "---", "--------"
    );
    for story in stories {
        let id = story.id.to_string();
        let active = story.branches.iter().filter(|b| b.created).count();
        println!(
            "{:<10} {:<40} {:<8} {:<8} {:>8}",
            &id[..8],
            story.topic,
            story.base_branch,
            story.stable_tag,
            format!("{}/{}", active, story.branches.len())
        );
    }
}

fn print_story(story: &Story) {
    println!();
    println!("{} {}", style("Story").bold(), story.id);
    println!("  Topic:   {}", style(&story.topic).yellow());
    println!("  Issue:   {} ({})", story.issue_name, story.kind);
    println!("  Base:    {}", story.base_branch);
    println!("  {}Tag: {}", TAG, story.stable_tag);
    println!(
        "  Created: {}",
        story.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();
    println!("  {}Branches:", BRANCH);
    for (i, (selection, branch)) in story.selections.iter().zip(&story.branches).enumerate() {
        let state = if branch.created {
            style("created").green()
        } else {
            style("deleted").dim()
        };
        println!(
            "  {:>3}  L{} F{} {:<6}  {:<50} {:<8} {:<8} {}",
            i,
            selection.level,
            selection.feature,
            selection.component,
            branch.branch_name,
            branch.selected_tag,
            branch.base_branch.as_deref().unwrap_or("-"),
            state
        );
    }
    println!();
}

fn story_rm(config: &Config, store: &mut StoryStore, key: &str, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    let story = find(store, key)?;
    let (id, topic) = (story.id, story.topic.clone());

    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!("Delete story {}?", topic))
            .default(false)
            .interact()
            .unwrap_or(false);
        if !confirm {
            println!("Delete cancelled");
            return Ok(());
        }
    }

    store.remove_story(id);
    save_stories(&config.stories_file(), store.stories())?;
    println!("{}Deleted story {}", CHECK, topic);
    Ok(())
}
