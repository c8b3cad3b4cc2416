//! Touch command implementation.
//!
//! Layers whose data lives outside the project (a database table, a file
//! rewritten by another tool) cannot be diffed locally. Touching one stores
//! the current time as its data timestamp, which changes its fingerprint so
//! the next publish re-uploads it.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use super::Context;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::model::{LayerTree, TreeNode};
use crate::sync::SyncSession;

#[derive(Serialize)]
struct Touched<'a> {
    layer_id: &'a str,
    timestamp: i64,
}

fn collect_ids<'a>(nodes: &'a [TreeNode], ids: &mut HashSet<&'a str>) {
    for node in nodes {
        match node {
            TreeNode::Layer(layer) => {
                ids.insert(layer.id.as_str());
            }
            TreeNode::Group(group) => collect_ids(&group.children, ids),
        }
    }
}

/// Ids of every layer in the tree, at any depth.
fn layer_ids(tree: &LayerTree) -> HashSet<&str> {
    let mut ids = HashSet::new();
    collect_ids(&tree.children, &mut ids);
    ids
}

/// Execute the touch command.
///
/// # Errors
///
/// Returns `InvalidArgument` if a layer id is not in the project, or an
/// error if the timestamps cannot be stored.
pub fn execute(ctx: &Context, project: &Path, layers: &[String]) -> Result<()> {
    let host = ctx.open_project(project)?;
    let tree = host.layer_tree()?;
    let known = layer_ids(&tree);
    if let Some(missing) = layers.iter().find(|id| !known.contains(id.as_str())) {
        return Err(Error::InvalidArgument(format!(
            "no layer with id {missing} in {}",
            project.display()
        )));
    }

    let mut session = SyncSession::load(&host)?;
    let mut touched = Vec::with_capacity(layers.len());
    for id in layers {
        let timestamp = session.record_data_change(&host, id)?;
        touched.push(Touched {
            layer_id: id,
            timestamp,
        });
    }

    if ctx.json {
        println!("{}", serde_json::to_string(&touched)?);
    } else if !ctx.quiet {
        for t in &touched {
            println!("Marked {} as changed", t.layer_id);
        }
    }
    Ok(())
}
