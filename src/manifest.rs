//! In-memory model for installer repository manifests.
//!
//! Entities live in flat arenas inside [`RepositoryBuilder`] and refer to each
//! other by stable identifier, never by live handle, so the graph is a plain
//! set of directed reference edges with no ownership cycles. Construction is
//! single threaded and single pass; [`RepositoryBuilder::finalize`] consumes
//! the builder and emits the canonical document, so entities are frozen once
//! serialized.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::xml::Element;

/// Process-unique identity for one repository object. Assigned once at
/// creation, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(Uuid);

impl ObjectId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated().to_string().to_uppercase())
    }
}

/// Errors that abort manifest construction. No partial or corrected document
/// is ever produced after one of these.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(
        "feature tree node \"{node}\" has a derived installation level of {derived} \
         from referenced features; installation level {requested} was rejected \
         (node level must not exceed the minimum referenced feature level)"
    )]
    StructuralConflict {
        node: String,
        derived: u32,
        requested: u32,
    },
    #[error(
        "feature tree node \"{node}\" has an explicit installation level of {explicit}, \
         but a feature with installation level {feature_level} was referenced \
         (node level must not exceed the minimum referenced feature level)"
    )]
    ReferenceLevelConflict {
        node: String,
        explicit: u32,
        feature_level: u32,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

macro_rules! arena_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(usize);
    };
}

arena_handle!(
    /// Handle to a [`Feature`] owned by a builder.
    FeatureHandle
);
arena_handle!(
    /// Handle to a file group owned by a builder.
    FileGroupHandle
);
arena_handle!(
    /// Handle to a source package owned by a builder.
    PackageHandle
);
arena_handle!(
    /// Handle to a feature tree node owned by a builder.
    NodeHandle
);

/// Named installable unit; optionally leveled, possibly nested.
#[derive(Debug)]
struct Feature {
    id: ObjectId,
    title: String,
    description: Option<String>,
    installation_level: Option<u32>,
    children: Vec<FeatureHandle>,
    references: Vec<ObjectId>,
    dependencies: Vec<ObjectId>,
    is_root: bool,
}

/// Ordered list of source -> target file mappings.
#[derive(Debug)]
struct FileGroup {
    id: ObjectId,
    name: Option<String>,
    files: Vec<(PathBuf, PathBuf)>,
}

/// Named bundle grouping file sets for physical distribution.
#[derive(Debug)]
struct SourcePackage {
    id: ObjectId,
    name: String,
    embedded: bool,
    references: Vec<ObjectId>,
}

/// UI grouping node over features. Tracks the running minimum installation
/// level of the features it references.
#[derive(Debug)]
struct FeatureTreeNode {
    id: ObjectId,
    name: String,
    description: Option<String>,
    children: Vec<NodeHandle>,
    references: Vec<ObjectId>,
    explicit_level: Option<u32>,
    derived_level: Option<u32>,
    is_root: bool,
}

/// Inclusion predicate for directory enumeration; receives the source path.
pub type FileFilter<'a> = &'a dyn Fn(&Path) -> bool;

/// Builder for one manifest document.
#[derive(Debug, Default)]
pub struct RepositoryBuilder {
    features: Vec<Feature>,
    file_groups: Vec<FileGroup>,
    packages: Vec<SourcePackage>,
    nodes: Vec<FeatureTreeNode>,
}

impl RepositoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_feature(
        &mut self,
        title: impl Into<String>,
        description: Option<&str>,
    ) -> FeatureHandle {
        self.insert_feature(title.into(), description, true)
    }

    /// Creates a new feature as a child of `parent`. Children are created in
    /// place, so the feature tree cannot contain cycles or shared subtrees.
    pub fn add_sub_feature(
        &mut self,
        parent: FeatureHandle,
        title: impl Into<String>,
        description: Option<&str>,
    ) -> FeatureHandle {
        let child = self.insert_feature(title.into(), description, false);
        self.features[parent.0].children.push(child);
        child
    }

    /// Sets the feature's installation level. Levels are positive ordinals.
    pub fn set_installation_level(
        &mut self,
        feature: FeatureHandle,
        level: u32,
    ) -> Result<(), ManifestError> {
        if level == 0 {
            return Err(ManifestError::InvalidArgument(format!(
                "installation level must be > 0 for feature \"{}\"",
                self.features[feature.0].title
            )));
        }
        self.features[feature.0].installation_level = Some(level);
        Ok(())
    }

    /// Records a reference edge from a feature to the file group holding its
    /// payload.
    pub fn add_feature_reference(&mut self, feature: FeatureHandle, group: FileGroupHandle) {
        let id = self.file_groups[group.0].id;
        self.features[feature.0].references.push(id);
    }

    /// Records a dependency edge between two features.
    pub fn add_feature_dependency(&mut self, feature: FeatureHandle, depends_on: FeatureHandle) {
        let id = self.features[depends_on.0].id;
        self.features[feature.0].dependencies.push(id);
    }

    pub fn create_file_group(&mut self) -> FileGroupHandle {
        self.insert_file_group(None)
    }

    /// Creates a named file group (a "file set" in manifest terms).
    pub fn create_file_set(&mut self, name: impl Into<String>) -> FileGroupHandle {
        self.insert_file_group(Some(name.into()))
    }

    /// Appends one explicit source -> target mapping. The target is the file
    /// name joined under `target_prefix` when given.
    pub fn add_file(
        &mut self,
        group: FileGroupHandle,
        source: impl Into<PathBuf>,
        target_prefix: Option<&Path>,
    ) -> Result<(), ManifestError> {
        let source = source.into();
        let file_name = source.file_name().ok_or_else(|| {
            ManifestError::InvalidArgument(format!(
                "path \"{}\" has no file name component",
                source.display()
            ))
        })?;
        let target = match target_prefix {
            Some(prefix) => prefix.join(file_name),
            None => PathBuf::from(file_name),
        };
        self.file_groups[group.0].files.push((source, target));
        Ok(())
    }

    /// Walks `directory` read-only and appends a mapping for every accepted
    /// file, preserving its path relative to `directory` under
    /// `target_prefix`. Traversal is sorted by name so serialization is
    /// deterministic, but consumers must treat the mapping list as a set.
    pub fn add_files_from_directory(
        &mut self,
        group: FileGroupHandle,
        directory: &Path,
        target_prefix: &Path,
        filter: Option<FileFilter<'_>>,
        recursive: bool,
    ) -> Result<(), ManifestError> {
        let mut sources = Vec::new();
        collect_files(directory, filter, recursive, &mut sources)?;
        for source in sources {
            let relative = source
                .strip_prefix(directory)
                .expect("enumerated path is under its root");
            let target = target_prefix.join(relative);
            self.file_groups[group.0].files.push((source, target));
        }
        Ok(())
    }

    pub fn create_source_package(
        &mut self,
        name: impl Into<String>,
        embedded: bool,
    ) -> PackageHandle {
        let package = SourcePackage {
            id: ObjectId::new(),
            name: name.into(),
            embedded,
            references: Vec::new(),
        };
        self.packages.push(package);
        PackageHandle(self.packages.len() - 1)
    }

    /// Assigns a file group to a source package for distribution.
    pub fn add_package_reference(&mut self, package: PackageHandle, group: FileGroupHandle) {
        let id = self.file_groups[group.0].id;
        self.packages[package.0].references.push(id);
    }

    pub fn create_feature_tree_node(
        &mut self,
        name: impl Into<String>,
        description: Option<&str>,
    ) -> NodeHandle {
        self.insert_node(name.into(), description, true)
    }

    /// Creates a child grouping node under `parent`.
    pub fn add_child_node(
        &mut self,
        parent: NodeHandle,
        name: impl Into<String>,
        description: Option<&str>,
    ) -> NodeHandle {
        let child = self.insert_node(name.into(), description, false);
        self.nodes[parent.0].children.push(child);
        child
    }

    /// Adds a reference edge from a tree node to a feature and folds the
    /// feature's installation level into the node's derived minimum.
    /// Unleveled features do not contribute. Fails when the node already has
    /// an explicit level above the referenced feature's level, since that
    /// would break the monotonicity invariant after the fact.
    pub fn add_node_reference(
        &mut self,
        node: NodeHandle,
        feature: FeatureHandle,
    ) -> Result<(), ManifestError> {
        let feature_id = self.features[feature.0].id;
        let feature_level = self.features[feature.0].installation_level;
        let entry = &mut self.nodes[node.0];

        if let Some(level) = feature_level {
            if let Some(explicit) = entry.explicit_level {
                if explicit > level {
                    return Err(ManifestError::ReferenceLevelConflict {
                        node: entry.name.clone(),
                        explicit,
                        feature_level: level,
                    });
                }
            }
            entry.derived_level = Some(match entry.derived_level {
                Some(current) => current.min(level),
                None => level,
            });
        }
        entry.references.push(feature_id);
        Ok(())
    }

    /// Sets the node's explicit installation level. The level must not exceed
    /// the derived minimum of the features the node references; violating
    /// that is a structural error and leaves the node unchanged.
    pub fn set_node_installation_level(
        &mut self,
        node: NodeHandle,
        level: u32,
    ) -> Result<(), ManifestError> {
        let entry = &mut self.nodes[node.0];
        if level == 0 {
            return Err(ManifestError::InvalidArgument(format!(
                "installation level must be > 0 for node \"{}\"",
                entry.name
            )));
        }
        if let Some(derived) = entry.derived_level {
            if level > derived {
                return Err(ManifestError::StructuralConflict {
                    node: entry.name.clone(),
                    derived,
                    requested: level,
                });
            }
        }
        entry.explicit_level = Some(level);
        Ok(())
    }

    /// Returns the node's derived installation level, if any referenced
    /// feature is leveled.
    pub fn node_derived_level(&self, node: NodeHandle) -> Option<u32> {
        self.nodes[node.0].derived_level
    }

    /// Returns the node's explicit installation level, if set.
    pub fn node_installation_level(&self, node: NodeHandle) -> Option<u32> {
        self.nodes[node.0].explicit_level
    }

    /// Returns the file mappings recorded for a group.
    pub fn group_files(&self, group: FileGroupHandle) -> &[(PathBuf, PathBuf)] {
        &self.file_groups[group.0].files
    }

    /// Serializes the manifest into its canonical document. Consumes the
    /// builder; the output is immutable and never re-parsed here.
    pub fn finalize(self) -> String {
        let mut root = Element::new("Repository");
        root.child(Element::new("Properties"));

        let mut features = Element::new("Features");
        for (index, feature) in self.features.iter().enumerate() {
            if feature.is_root {
                features.child(self.feature_to_xml(FeatureHandle(index)));
            }
        }
        root.child(features);

        let mut files = Element::new("Files");
        for group in &self.file_groups {
            let owner = self
                .packages
                .iter()
                .find(|package| package.references.contains(&group.id));
            let mut element = Element::new("Group")
                .attr("Id", group.id.to_string())
                .attr_opt("Name", group.name.clone())
                .attr_opt("SourcePackage", owner.map(|package| package.id.to_string()));
            for (source, target) in &group.files {
                element.child(
                    Element::new("File")
                        .attr("Source", source.display().to_string())
                        .attr("Target", target.display().to_string()),
                );
            }
            files.child(element);
        }
        if !self.packages.is_empty() {
            let mut packages = Element::new("Packages");
            for package in &self.packages {
                let mut element = Element::new("Package")
                    .attr("Id", package.id.to_string())
                    .attr("Name", package.name.clone())
                    .attr("Embedded", if package.embedded { "true" } else { "false" });
                for reference in &package.references {
                    element.child(Element::new("Reference").attr("Id", reference.to_string()));
                }
                packages.child(element);
            }
            files.child(packages);
        }
        root.child(files);

        if !self.nodes.is_empty() {
            let mut tree = Element::new("FeatureTree");
            for (index, node) in self.nodes.iter().enumerate() {
                if node.is_root {
                    tree.child(self.node_to_xml(NodeHandle(index)));
                }
            }
            let mut ui = Element::new("UI");
            ui.child(tree);
            root.child(ui);
        }

        root.to_document()
    }

    fn insert_feature(
        &mut self,
        title: String,
        description: Option<&str>,
        is_root: bool,
    ) -> FeatureHandle {
        let feature = Feature {
            id: ObjectId::new(),
            title,
            description: description.map(str::to_string),
            installation_level: None,
            children: Vec::new(),
            references: Vec::new(),
            dependencies: Vec::new(),
            is_root,
        };
        self.features.push(feature);
        FeatureHandle(self.features.len() - 1)
    }

    fn insert_file_group(&mut self, name: Option<String>) -> FileGroupHandle {
        let group = FileGroup {
            id: ObjectId::new(),
            name,
            files: Vec::new(),
        };
        self.file_groups.push(group);
        FileGroupHandle(self.file_groups.len() - 1)
    }

    fn insert_node(&mut self, name: String, description: Option<&str>, is_root: bool) -> NodeHandle {
        let node = FeatureTreeNode {
            id: ObjectId::new(),
            name,
            description: description.map(str::to_string),
            children: Vec::new(),
            references: Vec::new(),
            explicit_level: None,
            derived_level: None,
            is_root,
        };
        self.nodes.push(node);
        NodeHandle(self.nodes.len() - 1)
    }

    fn feature_to_xml(&self, handle: FeatureHandle) -> Element {
        let feature = &self.features[handle.0];
        let mut element = Element::new("Feature")
            .attr("Id", feature.id.to_string())
            .attr("Title", feature.title.clone())
            .attr_opt("Description", feature.description.clone())
            .attr_opt(
                "InstallationLevel",
                feature.installation_level.map(|level| level.to_string()),
            );
        for reference in &feature.references {
            element.child(Element::new("Reference").attr("Id", reference.to_string()));
        }
        for dependency in &feature.dependencies {
            element.child(Element::new("Dependency").attr("Id", dependency.to_string()));
        }
        for child in &feature.children {
            element.child(self.feature_to_xml(*child));
        }
        element
    }

    fn node_to_xml(&self, handle: NodeHandle) -> Element {
        let node = &self.nodes[handle.0];
        let mut element = Element::new("Node")
            .attr("Name", node.name.clone())
            .attr_opt("Description", node.description.clone())
            .attr_opt(
                "InstallationLevel",
                node.explicit_level.map(|level| level.to_string()),
            );
        for child in &node.children {
            element.child(self.node_to_xml(*child));
        }
        for reference in &node.references {
            element.child(Element::new("Reference").attr("Id", reference.to_string()));
        }
        element
    }
}

fn collect_files(
    directory: &Path,
    filter: Option<FileFilter<'_>>,
    recursive: bool,
    out: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(directory)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let path = entry.path();
        if let Some(filter) = filter {
            if !filter(&path) {
                continue;
            }
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if recursive {
                collect_files(&path, filter, recursive, out)?;
            }
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}
