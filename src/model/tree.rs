//! Host layer tree and the local tree walker.
//!
//! The host hands over a nested tree of groups and layers. [`LocalTree::walk`]
//! flattens it in one depth-first pass into index-addressed arrays: each
//! group and layer gets a visual order and the index of its parent group.
//! Nothing holds a reference back into the host tree.

use serde::{Deserialize, Serialize};

use super::layer::{GeometryClass, LayerStyle, LocalLayer};

/// Index of a group in [`LocalTree::groups`].
pub type GroupIdx = usize;

/// Root of the host's layer tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerTree {
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

/// A node in the host tree, listed topmost first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeNode {
    Group(HostGroup),
    Layer(HostLayer),
}

/// A group as the host reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostGroup {
    pub name: String,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

/// A layer as the host reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostLayer {
    pub id: String,
    pub name: String,
    /// Data provider, e.g. `ogr`, `gdal`, `wms`, `wfs`.
    pub provider: String,
    /// Provider-specific source locator.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub geometry: Option<GeometryClass>,
    /// Authority id such as `EPSG:4326`.
    #[serde(default)]
    pub crs: Option<String>,
    /// `[x_min, y_min, x_max, y_max]`.
    #[serde(default)]
    pub extent: Option<[f64; 4]>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub style: Option<LayerStyle>,
}

const fn default_visible() -> bool {
    true
}

/// A flattened local group.
///
/// Groups have no identity beyond the pass; they are matched to remote
/// folders through the layers they hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalGroup {
    pub name: String,
    pub order: i64,
    pub parent: Option<GroupIdx>,
}

/// A flattened local layer slot.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerEntry {
    pub id: String,
    pub order: i64,
    pub parent: Option<GroupIdx>,
    /// `None` when the host layer is not supported by the map service.
    pub layer: Option<LocalLayer>,
}

/// Arena form of the host tree for one analysis pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalTree {
    /// Groups in pre-order: a parent always precedes its children.
    pub groups: Vec<LocalGroup>,
    pub layers: Vec<LayerEntry>,
}

impl LocalTree {
    /// Flatten `tree`, resolving each host layer with `resolve`.
    ///
    /// Orders are assigned by traversal position and then inverted
    /// (`max - order + 1`) so the topmost entry gets the largest order.
    pub fn walk<F>(tree: &LayerTree, mut resolve: F) -> Self
    where
        F: FnMut(&HostLayer) -> Option<LocalLayer>,
    {
        let mut out = Self::default();
        let mut counter = 0i64;
        out.walk_nodes(&tree.children, None, &mut counter, &mut resolve);

        for group in &mut out.groups {
            group.order = counter - group.order + 1;
        }
        for layer in &mut out.layers {
            layer.order = counter - layer.order + 1;
        }
        out
    }

    fn walk_nodes<F>(
        &mut self,
        nodes: &[TreeNode],
        parent: Option<GroupIdx>,
        counter: &mut i64,
        resolve: &mut F,
    ) where
        F: FnMut(&HostLayer) -> Option<LocalLayer>,
    {
        for node in nodes {
            *counter += 1;
            match node {
                TreeNode::Group(group) => {
                    let idx = self.groups.len();
                    self.groups.push(LocalGroup {
                        name: group.name.clone(),
                        order: *counter,
                        parent,
                    });
                    self.walk_nodes(&group.children, Some(idx), counter, resolve);
                }
                TreeNode::Layer(layer) => {
                    self.layers.push(LayerEntry {
                        id: layer.id.clone(),
                        order: *counter,
                        parent,
                        layer: resolve(layer),
                    });
                }
            }
        }
    }

    /// Iterate `group` and its ancestors, innermost first.
    pub fn ancestors(&self, group: GroupIdx) -> impl Iterator<Item = GroupIdx> + '_ {
        std::iter::successors(Some(group), move |&g| self.groups[g].parent)
    }

    /// Find a layer slot by host id.
    #[must_use]
    pub fn layer(&self, id: &str) -> Option<&LayerEntry> {
        self.layers.iter().find(|l| l.id == id)
    }
}
