//! The element tree
//!
//! A message is a tree of [`Element`] nodes in strict containment order:
//! Message ⊃ Group ⊃ Segment ⊃ Field ⊃ Component ⊃ SubComponent. Every node
//! carries its schema key (or none, for anonymous nodes in lenient trees),
//! the ambient version, validation level, and delimiter set inherited from
//! the root, and an ordered child list in wire order; repetitions are
//! same-named siblings.
//!
//! Navigation uses slash/bracket paths (`PID/PID_5[0]/XPN_1`). Names are
//! case-insensitive and resolve in short-name, long-name, data-type-alias
//! order. Assignment through a path creates missing schema-legal
//! intermediates; bare reads never create nodes.

use crate::er7::printer;
use crate::er7::syntax::Delimiters;
use crate::path::parse_path;
use crate::{Error, Result};
use hl7_schema::{SchemaRegistry, StructureKind, Version};
use serde::{Deserialize, Serialize};

/// The six node kinds, in containment order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Message,
    Group,
    Segment,
    Field,
    Component,
    SubComponent,
}

impl ElementKind {
    /// Whether `child` may appear directly under a node of this kind
    pub fn may_contain(self, child: ElementKind) -> bool {
        matches!(
            (self, child),
            (ElementKind::Message, ElementKind::Group)
                | (ElementKind::Message, ElementKind::Segment)
                | (ElementKind::Group, ElementKind::Group)
                | (ElementKind::Group, ElementKind::Segment)
                | (ElementKind::Segment, ElementKind::Field)
                | (ElementKind::Field, ElementKind::Component)
                | (ElementKind::Component, ElementKind::SubComponent)
        )
    }
}

/// The two validation disciplines
///
/// STRICT checks every mutation against the schema; LENIENT accepts unknown
/// structure verbatim and defers reporting to a whole-tree audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValidationLevel {
    Strict,
    #[default]
    Lenient,
}

impl ValidationLevel {
    pub fn is_strict(self) -> bool {
        matches!(self, ValidationLevel::Strict)
    }
}

/// A node in the element tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub(crate) kind: ElementKind,
    pub(crate) name: Option<String>,
    pub(crate) long_name: Option<String>,
    pub(crate) data_type: Option<String>,
    pub(crate) value: Option<String>,
    pub(crate) children: Vec<Element>,
    pub(crate) version: Version,
    pub(crate) validation: ValidationLevel,
    pub(crate) delimiters: Delimiters,
}

/// One step of an expanded, owned path
struct OwnedStep {
    name: String,
    index: Option<usize>,
}

impl Element {
    pub(crate) fn new_node(
        kind: ElementKind,
        name: Option<String>,
        long_name: Option<String>,
        data_type: Option<String>,
        version: Version,
        validation: ValidationLevel,
    ) -> Self {
        Self {
            kind,
            name,
            long_name,
            data_type,
            value: None,
            children: Vec::new(),
            version,
            validation,
            delimiters: Delimiters::default(),
        }
    }

    /// Create a message for a named structure (e.g. `ADT_A01`)
    ///
    /// When the structure is known to the schema, the MSH segment is seeded
    /// with the delimiter fields, message type, and version id. STRICT
    /// rejects unknown structure names.
    pub fn message(structure: &str, version: Version, validation: ValidationLevel) -> Result<Self> {
        let mut message = Self::message_shell(structure, version, validation)?;
        message.seed_msh()?;
        Ok(message)
    }

    /// A message node without the seeded MSH (parser entry point)
    pub(crate) fn message_shell(
        structure: &str,
        version: Version,
        validation: ValidationLevel,
    ) -> Result<Self> {
        let upper = structure.to_ascii_uppercase();
        let registry = SchemaRegistry::for_version(version)?;
        if registry.lookup_structure(&upper).kind != StructureKind::Message
            && validation.is_strict()
        {
            return Err(Error::InvalidName(structure.to_string()));
        }
        Ok(Self::new_node(
            ElementKind::Message,
            Some(upper),
            None,
            None,
            version,
            validation,
        ))
    }

    /// A message with no structure name (lenient only)
    pub fn anonymous_message(version: Version, validation: ValidationLevel) -> Result<Self> {
        if validation.is_strict() {
            return Err(Error::InvalidName("anonymous message".to_string()));
        }
        Ok(Self::new_node(
            ElementKind::Message,
            None,
            None,
            None,
            version,
            validation,
        ))
    }

    /// Create a group node
    pub fn group(name: &str, version: Version, validation: ValidationLevel) -> Result<Self> {
        let upper = name.to_ascii_uppercase();
        let registry = SchemaRegistry::for_version(version)?;
        if registry.lookup_structure(&upper).kind != StructureKind::Group && validation.is_strict()
        {
            return Err(Error::InvalidName(name.to_string()));
        }
        Ok(Self::new_node(
            ElementKind::Group,
            Some(upper),
            None,
            None,
            version,
            validation,
        ))
    }

    /// Create a segment node
    ///
    /// The name must match `[A-Z0-9]{3}`; STRICT additionally requires it to
    /// be known to the schema.
    pub fn segment(name: &str, version: Version, validation: ValidationLevel) -> Result<Self> {
        let upper = name.to_ascii_uppercase();
        if !is_segment_name(&upper) {
            return Err(Error::InvalidName(name.to_string()));
        }
        let registry = SchemaRegistry::for_version(version)?;
        if registry.lookup_structure(&upper).kind != StructureKind::Segment
            && validation.is_strict()
        {
            return Err(Error::InvalidName(name.to_string()));
        }
        Ok(Self::new_node(
            ElementKind::Segment,
            Some(upper),
            None,
            None,
            version,
            validation,
        ))
    }

    /// Create a field node (e.g. `PID_5`)
    pub fn field(name: &str, version: Version, validation: ValidationLevel) -> Result<Self> {
        Self::typed_child(name, ElementKind::Field, StructureKind::Field, version, validation)
    }

    /// Create a component node (e.g. `XPN_1` or the alias `PID_5_1`)
    pub fn component(name: &str, version: Version, validation: ValidationLevel) -> Result<Self> {
        Self::typed_child(
            name,
            ElementKind::Component,
            StructureKind::Component,
            version,
            validation,
        )
    }

    /// Create a subcomponent node (e.g. `FN_1`)
    pub fn subcomponent(name: &str, version: Version, validation: ValidationLevel) -> Result<Self> {
        Self::typed_child(
            name,
            ElementKind::SubComponent,
            StructureKind::Component,
            version,
            validation,
        )
    }

    fn typed_child(
        name: &str,
        kind: ElementKind,
        expected: StructureKind,
        version: Version,
        validation: ValidationLevel,
    ) -> Result<Self> {
        let upper = name.to_ascii_uppercase();
        let registry = SchemaRegistry::for_version(version)?;
        let info = registry.lookup_structure(&upper);
        if info.kind == expected {
            return Ok(Self::new_node(
                kind,
                Some(info.name),
                info.long_name,
                info.data_type,
                version,
                validation,
            ));
        }
        if validation.is_strict() {
            return Err(Error::InvalidName(name.to_string()));
        }
        // Lenient: keep the unknown name verbatim, untyped
        Ok(Self::new_node(kind, Some(upper), None, None, version, validation))
    }

    /// A nameless node (lenient only)
    pub fn anonymous(
        kind: ElementKind,
        version: Version,
        validation: ValidationLevel,
    ) -> Result<Self> {
        if validation.is_strict() {
            return Err(Error::InvalidName("anonymous element".to_string()));
        }
        Ok(Self::new_node(kind, None, None, None, version, validation))
    }

    // Accessors

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn long_name(&self) -> Option<&str> {
        self.long_name.as_deref()
    }

    pub fn data_type(&self) -> Option<&str> {
        self.data_type.as_deref()
    }

    /// The decoded value of a scalar node
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Ordered children in wire order, repetitions included
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn validation(&self) -> ValidationLevel {
        self.validation
    }

    /// The ambient delimiter set this node inherited
    pub fn delimiters(&self) -> Delimiters {
        self.delimiters
    }

    /// Whether this node holds a scalar value rather than children
    pub fn is_scalar(&self) -> bool {
        match self.kind {
            ElementKind::SubComponent => true,
            ElementKind::Field | ElementKind::Component => match &self.data_type {
                Some(dt) => self
                    .registry()
                    .map(|r| r.is_base(dt))
                    .unwrap_or(self.children.is_empty()),
                None => self.children.is_empty(),
            },
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.iter().all(Element::is_empty)
    }

    fn registry(&self) -> Result<SchemaRegistry> {
        Ok(SchemaRegistry::for_version(self.version)?)
    }

    fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("<anonymous {:?}>", self.kind),
        }
    }

    fn count_children(&self, name: &str) -> usize {
        self.children
            .iter()
            .filter(|c| c.name.as_deref() == Some(name))
            .count()
    }

    fn child_position(&self, name: &str, index: usize) -> Option<usize> {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name.as_deref() == Some(name))
            .map(|(i, _)| i)
            .nth(index)
    }

    // Mutation

    /// Append a child, enforcing schema legality and cardinality in STRICT
    pub fn add(&mut self, child: Element) -> Result<()> {
        if !self.kind.may_contain(child.kind) {
            return Err(Error::OperationNotAllowed(format!(
                "a {:?} cannot contain a {:?}",
                self.kind, child.kind
            )));
        }
        if self.validation.is_strict() {
            let child_name = child
                .name
                .as_deref()
                .ok_or_else(|| Error::InvalidName("anonymous element".to_string()))?;
            let parent_key = self
                .name
                .as_deref()
                .ok_or_else(|| Error::InvalidName("anonymous element".to_string()))?;
            let registry = self.registry()?;
            let cardinality = registry
                .child_cardinality(parent_key, child_name)
                .ok_or_else(|| Error::ChildNotValid {
                    parent: parent_key.to_string(),
                    child: child_name.to_string(),
                })?;
            let count = self.count_children(child_name);
            if !cardinality.accepts(count) {
                return Err(Error::MaxChildLimitReached {
                    parent: parent_key.to_string(),
                    child: child_name.to_string(),
                    max: cardinality.max.max(0) as usize,
                });
            }
        }
        self.push_adopted(child);
        Ok(())
    }

    /// Append without schema checks (codec internals)
    pub(crate) fn push_adopted(&mut self, mut child: Element) {
        child.repoint(self.version, self.validation, self.delimiters);
        self.children.push(child);
    }

    /// Construct and append a segment, returning it for further mutation
    pub fn add_segment(&mut self, name: &str) -> Result<&mut Element> {
        let child = Element::segment(name, self.version, self.validation)?;
        self.add(child)?;
        let last = self.children.len() - 1;
        Ok(&mut self.children[last])
    }

    /// Construct and append a group
    pub fn add_group(&mut self, name: &str) -> Result<&mut Element> {
        let child = Element::group(name, self.version, self.validation)?;
        self.add(child)?;
        let last = self.children.len() - 1;
        Ok(&mut self.children[last])
    }

    /// Construct and append a field
    pub fn add_field(&mut self, name: &str) -> Result<&mut Element> {
        let child = Element::field(name, self.version, self.validation)?;
        self.add(child)?;
        let last = self.children.len() - 1;
        Ok(&mut self.children[last])
    }

    /// Detach the `index`-th repetition of a named child and return it
    ///
    /// Removal performs no cardinality enforcement; a later audit reports an
    /// under-minimum.
    pub fn remove(&mut self, name: &str, index: usize) -> Result<Element> {
        let names = self.resolve_for_read(name).ok_or_else(|| Error::ChildNotFound {
            parent: self.display_name(),
            name: name.to_string(),
        })?;
        let target = names.last().cloned().unwrap_or_default();
        if names.len() > 1 {
            return Err(Error::OperationNotAllowed(format!(
                "cannot remove through the aliased name '{name}'"
            )));
        }
        let position = self
            .child_position(&target, index)
            .ok_or_else(|| Error::ChildNotFound {
                parent: self.display_name(),
                name: name.to_string(),
            })?;
        Ok(self.children.remove(position))
    }

    // Name resolution
    //
    // Short (schema key) names win over long names; data-type aliases come
    // last. A resolved name may expand to two levels when an aliased form
    // like `PID_5_1` is used on the segment itself.

    fn resolve_for_read(&self, raw: &str) -> Option<Vec<String>> {
        let upper = raw.to_ascii_uppercase();
        let registry = self.registry().ok()?;

        if let Some(key) = self.schema_key() {
            if let Some(slots) = registry.children_of(&key) {
                if slots.iter().any(|s| s.name == upper) {
                    return Some(vec![upper]);
                }
            }
            if let Some(resolved) = registry.resolve_long_name(&key, raw) {
                return Some(vec![resolved]);
            }
        }

        if self
            .children
            .iter()
            .any(|c| c.name.as_deref() == Some(upper.as_str()))
        {
            return Some(vec![upper]);
        }

        // Aliased component forms
        let parts: Vec<&str> = upper.split('_').collect();
        if parts.len() == 3 {
            let field_name = format!("{}_{}", parts[0], parts[1]);
            let info = registry.lookup_structure(&upper);
            if info.kind == StructureKind::Component {
                match self.kind {
                    // On the segment: descend through the field
                    ElementKind::Segment if self.name.as_deref() == Some(parts[0]) => {
                        return Some(vec![field_name, info.name]);
                    }
                    // On the field itself: the alias names a component
                    ElementKind::Field if self.name.as_deref() == Some(field_name.as_str()) => {
                        return Some(vec![info.name]);
                    }
                    _ => {}
                }
            }
        }
        None
    }

    fn resolve_for_write(&self, raw: &str) -> Result<Vec<String>> {
        if let Some(names) = self.resolve_for_read(raw) {
            return Ok(names);
        }
        let upper = raw.to_ascii_uppercase();
        if self.validation.is_strict() {
            return Err(Error::ChildNotValid {
                parent: self.display_name(),
                child: raw.to_string(),
            });
        }
        if is_plausible_key(&upper) {
            Ok(vec![upper])
        } else {
            Err(Error::InvalidName(raw.to_string()))
        }
    }

    /// The key used for schema lookups on behalf of this node
    fn schema_key(&self) -> Option<String> {
        self.name.clone()
    }

    // Reads

    /// All repetitions reached by a path
    ///
    /// Intermediate steps default to repetition 0. A path that resolves in
    /// the schema but reaches no node yields an empty vector; a name that is
    /// schema-illegal for its parent fails with `ChildNotFound`.
    pub fn get(&self, path: &str) -> Result<Vec<&Element>> {
        let steps = parse_path(path)?;
        let mut queue: Vec<OwnedStep> = Vec::new();
        for step in &steps {
            queue.push(OwnedStep {
                name: step.name.to_string(),
                index: step.index,
            });
        }

        let mut node = self;
        let mut i = 0;
        while i < queue.len() {
            let step = &queue[i];
            let names = node.resolve_for_read(&step.name).ok_or_else(|| {
                Error::ChildNotFound {
                    parent: node.display_name(),
                    name: step.name.clone(),
                }
            })?;
            if names.len() == 2 {
                // Expand the alias in place: field first, then component
                let index = step.index;
                queue[i] = OwnedStep {
                    name: names[0].clone(),
                    index: Some(0),
                };
                queue.insert(
                    i + 1,
                    OwnedStep {
                        name: names[1].clone(),
                        index,
                    },
                );
                continue;
            }
            let name = &names[0];
            let last = i == queue.len() - 1;
            if last {
                let matches: Vec<&Element> = self_children_named(node, name);
                return Ok(match queue[i].index {
                    Some(index) => matches.into_iter().skip(index).take(1).collect(),
                    None => matches,
                });
            }
            let index = queue[i].index.unwrap_or(0);
            match node.child_position(name, index) {
                Some(pos) => node = &node.children[pos],
                None => return Ok(Vec::new()),
            }
            i += 1;
        }
        Ok(Vec::new())
    }

    /// The first repetition reached by a path, if any
    pub fn first(&self, path: &str) -> Result<Option<&Element>> {
        Ok(self.get(path)?.into_iter().next())
    }

    // Writes

    /// Assign a string through a path, creating missing intermediates
    ///
    /// A scalar target decodes and stores the value; a composite or segment
    /// target sub-parses it with the ambient delimiters and swaps the new
    /// subtree in atomically.
    pub fn set_value(&mut self, path: &str, value: &str) -> Result<()> {
        let steps = parse_path(path)?;
        let mut queue: std::collections::VecDeque<OwnedStep> = steps
            .iter()
            .map(|s| OwnedStep {
                name: s.name.to_string(),
                index: s.index,
            })
            .collect();
        self.set_value_inner(&mut queue, value)
    }

    fn set_value_inner(
        &mut self,
        queue: &mut std::collections::VecDeque<OwnedStep>,
        value: &str,
    ) -> Result<()> {
        let Some(step) = queue.pop_front() else {
            return self.assign_text(value);
        };
        let names = self.resolve_for_write(&step.name)?;
        if names.len() == 2 {
            queue.push_front(OwnedStep {
                name: names[1].clone(),
                index: step.index,
            });
            let child = self.ensure_child(&names[0], 0)?;
            return child.set_value_inner(queue, value);
        }
        let child = self.ensure_child(&names[0], step.index.unwrap_or(0))?;
        child.set_value_inner(queue, value)
    }

    /// Attach a node through a path (detach-and-reattach)
    ///
    /// The final step replaces the repetition it names (default 0) or
    /// appends when absent. The child is re-pointed to this tree's version,
    /// validation level, and delimiters.
    pub fn set(&mut self, path: &str, child: Element) -> Result<()> {
        let steps = parse_path(path)?;
        let mut queue: std::collections::VecDeque<OwnedStep> = steps
            .iter()
            .map(|s| OwnedStep {
                name: s.name.to_string(),
                index: s.index,
            })
            .collect();
        self.set_inner(&mut queue, child)
    }

    fn set_inner(
        &mut self,
        queue: &mut std::collections::VecDeque<OwnedStep>,
        child: Element,
    ) -> Result<()> {
        // Invariant: queue is non-empty on entry
        let step = match queue.pop_front() {
            Some(step) => step,
            None => {
                return Err(Error::OperationNotAllowed(
                    "cannot attach a node to an empty path".to_string(),
                ))
            }
        };
        let names = self.resolve_for_write(&step.name)?;
        if names.len() == 2 {
            queue.push_front(OwnedStep {
                name: names[1].clone(),
                index: step.index,
            });
            let target = self.ensure_child(&names[0], 0)?;
            return target.set_inner(queue, child);
        }
        if !queue.is_empty() {
            let target = self.ensure_child(&names[0], step.index.unwrap_or(0))?;
            return target.set_inner(queue, child);
        }
        self.place_child(&names[0], step.index.unwrap_or(0), child)
    }

    fn place_child(&mut self, name: &str, index: usize, child: Element) -> Result<()> {
        if !self.kind.may_contain(child.kind) {
            return Err(Error::OperationNotAllowed(format!(
                "a {:?} cannot contain a {:?}",
                self.kind, child.kind
            )));
        }
        if self.validation.is_strict() && child.name.as_deref() != Some(name) {
            return Err(Error::ChildNotValid {
                parent: self.display_name(),
                child: child.display_name(),
            });
        }
        match self.child_position(name, index) {
            Some(pos) => {
                let mut child = child;
                child.repoint(self.version, self.validation, self.delimiters);
                self.children[pos] = child;
                Ok(())
            }
            None => {
                // Fill to keep repetition indices dense, then append
                let count = self.count_children(name);
                for _ in count..index {
                    let filler = self.create_child(name)?;
                    self.add(filler)?;
                }
                self.add(child)
            }
        }
    }

    fn ensure_child(&mut self, name: &str, index: usize) -> Result<&mut Element> {
        let count = self.count_children(name);
        for _ in count..=index {
            let child = self.create_child(name)?;
            self.add(child)?;
        }
        let pos = self
            .child_position(name, index)
            .ok_or_else(|| Error::ChildNotFound {
                parent: self.display_name(),
                name: name.to_string(),
            })?;
        Ok(&mut self.children[pos])
    }

    /// Construct an empty, schema-appropriate child for a resolved name
    fn create_child(&self, name: &str) -> Result<Element> {
        match self.kind {
            ElementKind::Message | ElementKind::Group => {
                let registry = self.registry()?;
                let slot_kind = self
                    .schema_key()
                    .and_then(|key| {
                        registry
                            .children_of(&key)
                            .and_then(|slots| slots.iter().find(|s| s.name == name))
                            .map(|s| s.kind)
                    });
                match slot_kind {
                    Some(StructureKind::Group) => {
                        Element::group(name, self.version, self.validation)
                    }
                    Some(_) => Element::segment(name, self.version, self.validation),
                    None if name.len() == 3 => {
                        Element::segment(name, self.version, self.validation)
                    }
                    None => Element::group(name, self.version, self.validation),
                }
            }
            ElementKind::Segment => Element::field(name, self.version, self.validation),
            ElementKind::Field => Element::component(name, self.version, self.validation),
            ElementKind::Component => Element::subcomponent(name, self.version, self.validation),
            ElementKind::SubComponent => Err(Error::OperationNotAllowed(
                "subcomponents are scalar leaves".to_string(),
            )),
        }
    }

    /// Store text on this node: decode-and-store for scalars, sub-parse for
    /// composite fields, components, and segments
    fn assign_text(&mut self, value: &str) -> Result<()> {
        match self.kind {
            ElementKind::Message | ElementKind::Group => Err(Error::OperationNotAllowed(format!(
                "cannot assign a string to a {:?}",
                self.kind
            ))),
            ElementKind::Segment => {
                let parsed = crate::er7::parser::parse_segment(
                    value,
                    &self.delimiters,
                    self.version,
                    self.validation,
                )?;
                if parsed.name != self.name {
                    return Err(Error::OperationNotAllowed(format!(
                        "segment text names {} but the target is {}",
                        parsed.display_name(),
                        self.display_name()
                    )));
                }
                self.children = parsed.children;
                self.value = None;
                self.repoint(self.version, self.validation, self.delimiters);
                Ok(())
            }
            ElementKind::Field | ElementKind::Component => {
                if self.is_scalar() && !self.splits_further(value) {
                    return self.set_scalar(value);
                }
                let parsed = if self.kind == ElementKind::Field {
                    crate::er7::parser::parse_field(
                        value,
                        self.name.as_deref(),
                        &self.delimiters,
                        self.version,
                        self.validation,
                    )?
                } else {
                    crate::er7::parser::parse_component(
                        value,
                        self.name.as_deref(),
                        &self.delimiters,
                        self.version,
                        self.validation,
                    )?
                };
                self.children = parsed.children;
                self.value = parsed.value;
                self.repoint(self.version, self.validation, self.delimiters);
                Ok(())
            }
            ElementKind::SubComponent => self.set_scalar(value),
        }
    }

    /// Whether assigning this text to an untyped node would introduce
    /// structure
    fn splits_further(&self, value: &str) -> bool {
        if self.data_type.is_some() {
            return false;
        }
        let bytes = value.as_bytes();
        match self.kind {
            ElementKind::Field => bytes.contains(&self.delimiters.component)
                || bytes.contains(&self.delimiters.subcomponent)
                || bytes.contains(&self.delimiters.repetition),
            ElementKind::Component => bytes.contains(&self.delimiters.subcomponent),
            _ => false,
        }
    }

    fn set_scalar(&mut self, value: &str) -> Result<()> {
        let decoded = self.delimiters.decode(value);
        if self.validation.is_strict() {
            self.check_scalar(&decoded)?;
        }
        self.value = if decoded.is_empty() { None } else { Some(decoded) };
        Ok(())
    }

    pub(crate) fn check_scalar(&self, decoded: &str) -> Result<()> {
        let Some(dt) = self.data_type.as_deref() else {
            return Ok(());
        };
        let registry = self.registry()?;
        let Some(constraints) = registry.base_constraints(dt) else {
            return Ok(());
        };
        if let Some(max) = constraints.max_length {
            let length = decoded.chars().count();
            if length > max {
                return Err(Error::MaxLengthReached {
                    name: self.display_name(),
                    max,
                    length,
                });
            }
        }
        if let Some(pattern) = &constraints.pattern {
            if !decoded.is_empty() && !pattern.is_match(decoded) {
                return Err(Error::InvalidValue {
                    name: self.display_name(),
                    data_type: dt.to_string(),
                    value: decoded.to_string(),
                });
            }
        }
        if let Some(charset) = &constraints.charset {
            if !decoded.chars().all(|c| charset.contains(c)) {
                return Err(Error::InvalidValue {
                    name: self.display_name(),
                    data_type: dt.to_string(),
                    value: decoded.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Directly store a raw, pre-decoded value (codec internals)
    pub(crate) fn set_raw_value(&mut self, value: &str) {
        self.value = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };
    }

    /// Re-point a subtree at this tree's ambient version, validation level,
    /// and delimiters
    pub(crate) fn repoint(
        &mut self,
        version: Version,
        validation: ValidationLevel,
        delimiters: Delimiters,
    ) {
        self.version = version;
        self.validation = validation;
        self.delimiters = delimiters;
        for child in &mut self.children {
            child.repoint(version, validation, delimiters);
        }
    }

    /// Replace the tree's delimiter set, updating MSH-1/MSH-2 on messages
    pub fn set_delimiters(&mut self, delimiters: Delimiters) {
        self.repoint(self.version, self.validation, delimiters);
        if self.kind == ElementKind::Message {
            if let Some(msh) = self
                .children
                .iter_mut()
                .find(|c| c.name.as_deref() == Some("MSH"))
            {
                if let Some(pos) = msh.child_position("MSH_1", 0) {
                    msh.children[pos].set_raw_value(&((delimiters.field as char).to_string()));
                }
                if let Some(pos) = msh.child_position("MSH_2", 0) {
                    msh.children[pos].set_raw_value(&delimiters.encoding_chars());
                }
            }
        }
    }

    /// The delimiter set that will govern the next encode: for messages,
    /// MSH-1/MSH-2 are consulted first so header mutations propagate
    pub fn effective_delimiters(&self) -> Delimiters {
        if self.kind == ElementKind::Message {
            if let Some(d) = self.delimiters_from_msh() {
                return d;
            }
        }
        self.delimiters
    }

    fn delimiters_from_msh(&self) -> Option<Delimiters> {
        let msh = self
            .children
            .iter()
            .find(|c| c.name.as_deref() == Some("MSH"))?;
        let field = msh
            .first("MSH_1")
            .ok()??
            .value()
            .filter(|v| v.len() == 1)?
            .as_bytes()[0];
        let enc = msh.first("MSH_2").ok()??.value()?.as_bytes().to_vec();
        if enc.len() != 4 {
            return None;
        }
        Delimiters::new(field, enc[0], enc[3], enc[1], enc[2]).ok()
    }

    /// Serialise this subtree to ER7 under the ambient delimiters
    pub fn to_er7(&self) -> Result<String> {
        let delimiters = self.effective_delimiters();
        Ok(printer::encode(self, &delimiters))
    }

    /// Serialise under an explicit delimiter set; on messages, MSH-1/MSH-2
    /// are emitted per the override
    pub fn to_er7_with(&self, delimiters: &Delimiters) -> Result<String> {
        Ok(printer::encode(self, delimiters))
    }

    /// Seed the MSH header of a freshly constructed message
    fn seed_msh(&mut self) -> Result<()> {
        let Some(structure) = self.name.clone() else {
            return Ok(());
        };
        let registry = self.registry()?;
        if registry.child_cardinality(&structure, "MSH").is_none() {
            return Ok(());
        }
        let delimiters = self.delimiters;
        let mut msh = Element::segment("MSH", self.version, self.validation)?;
        let mut msh_1 = Element::field("MSH_1", self.version, self.validation)?;
        msh_1.set_raw_value(&((delimiters.field as char).to_string()));
        let mut msh_2 = Element::field("MSH_2", self.version, self.validation)?;
        msh_2.set_raw_value(&delimiters.encoding_chars());
        msh.push_adopted(msh_1);
        msh.push_adopted(msh_2);
        self.push_adopted(msh);

        let mut parts = structure.splitn(2, '_');
        let code = parts.next().unwrap_or_default().to_string();
        let msh_9 = match parts.next() {
            Some(trigger) => format!(
                "{code}{sep}{trigger}{sep}{structure}",
                sep = delimiters.component as char
            ),
            None => code,
        };
        self.set_value("MSH/MSH_9", &msh_9)?;
        self.set_value("MSH/MSH_12", self.version.as_str())?;
        Ok(())
    }
}

fn self_children_named<'a>(node: &'a Element, name: &str) -> Vec<&'a Element> {
    node.children
        .iter()
        .filter(|c| c.name.as_deref() == Some(name))
        .collect()
}

fn is_segment_name(name: &str) -> bool {
    name.len() == 3
        && name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

fn is_plausible_key(name: &str) -> bool {
    !name.is_empty()
        && name.as_bytes()[0].is_ascii_uppercase()
        && name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict_message() -> Element {
        Element::message("ADT_A01", Version::V2_5, ValidationLevel::Strict).unwrap()
    }

    fn lenient_message() -> Element {
        Element::message("ADT_A01", Version::V2_5, ValidationLevel::Lenient).unwrap()
    }

    #[test]
    fn test_message_seeds_msh() {
        let m = strict_message();
        let msh = m.first("MSH").unwrap().unwrap();
        assert_eq!(msh.kind(), ElementKind::Segment);
        assert_eq!(
            m.first("MSH/MSH_1").unwrap().unwrap().value(),
            Some("|")
        );
        assert_eq!(
            m.first("MSH/MSH_2").unwrap().unwrap().value(),
            Some("^~\\&")
        );
        assert_eq!(
            m.first("MSH/MSH_9/MSG_3").unwrap().unwrap().value(),
            Some("ADT_A01")
        );
        assert_eq!(
            m.first("MSH/MSH_12/VID_1").unwrap().unwrap().value(),
            Some("2.5")
        );
    }

    #[test]
    fn test_strict_rejects_unknown_message() {
        let err = Element::message("NOT_REAL", Version::V2_5, ValidationLevel::Strict).unwrap_err();
        assert!(matches!(err, Error::InvalidName(_)));
    }

    #[test]
    fn test_lenient_accepts_unknown_segment() {
        let z = Element::segment("ZBE", Version::V2_5, ValidationLevel::Lenient).unwrap();
        assert_eq!(z.name(), Some("ZBE"));
        assert!(Element::segment("ZBE", Version::V2_5, ValidationLevel::Strict).is_err());
        assert!(Element::segment("zz", Version::V2_5, ValidationLevel::Lenient).is_err());
    }

    #[test]
    fn test_add_second_msh_hits_limit() {
        let mut m = strict_message();
        let err = m.add_segment("MSH").unwrap_err();
        assert!(matches!(err, Error::MaxChildLimitReached { .. }));
    }

    #[test]
    fn test_strict_rejects_illegal_child() {
        let mut m = strict_message();
        let field = Element::field("PID_1", Version::V2_5, ValidationLevel::Strict).unwrap();
        let err = m.set("MSH/PID_1", field).unwrap_err();
        assert!(matches!(err, Error::ChildNotValid { .. }));
    }

    #[test]
    fn test_strict_rejects_invalid_value() {
        let mut m = strict_message();
        let err = m.set_value("MSH/MSH_7", "abcde").unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
    }

    #[test]
    fn test_strict_rejects_overlong_value() {
        let mut m = strict_message();
        let long = "x".repeat(1000);
        let err = m.set_value("MSH/MSH_10", &long).unwrap_err();
        assert!(matches!(err, Error::MaxLengthReached { max: 200, .. }));
    }

    #[test]
    fn test_lazy_read_returns_empty_sequence() {
        let m = lenient_message();
        assert!(m.get("PID").unwrap().is_empty());
        assert!(m.get("NK1").unwrap().is_empty());
        // Reads do not create nodes
        assert_eq!(m.children().len(), 1); // only the seeded MSH
    }

    #[test]
    fn test_get_illegal_child_fails() {
        let m = strict_message();
        let err = m.get("ZZZ").unwrap_err();
        assert!(matches!(err, Error::ChildNotFound { .. }));
    }

    #[test]
    fn test_autovivify_on_assign() {
        let mut m = lenient_message();
        m.set_value("PID/PID_5_1", "EVERYMAN").unwrap();
        m.set_value("PID/PID_5_2", "ADAM").unwrap();
        let xpn_2 = m.first("PID/PID_5/XPN_2").unwrap().unwrap();
        assert_eq!(xpn_2.value(), Some("ADAM"));
        // XPN-1 is an FN composite in 2.5, so the surname lands in FN-1
        let fn_1 = m.first("PID/PID_5/XPN_1/FN_1").unwrap().unwrap();
        assert_eq!(fn_1.value(), Some("EVERYMAN"));
    }

    #[test]
    fn test_long_name_resolution() {
        let mut m = lenient_message();
        m.set_value("PID/patient_name", "EVERYMAN^ADAM").unwrap();
        let reps = m.get("PID/PID_5").unwrap();
        assert_eq!(reps.len(), 1);
        assert_eq!(
            m.first("PID/Patient_Name/given_name").unwrap().unwrap().value(),
            Some("ADAM")
        );
    }

    #[test]
    fn test_repetition_indices_stay_dense() {
        let mut m = lenient_message();
        m.set_value("PID/PID_13[2]/XTN_1", "555-1234").unwrap();
        let reps = m.get("PID/PID_13").unwrap();
        assert_eq!(reps.len(), 3);
        assert!(reps[0].is_empty());
        assert!(reps[1].is_empty());
        assert_eq!(
            reps[2].first("XTN_1").unwrap().unwrap().value(),
            Some("555-1234")
        );
    }

    #[test]
    fn test_detach_and_reattach() {
        let mut a = lenient_message();
        a.set_value("PID/PID_5_1", "EVERYMAN").unwrap();
        let pid = a.remove("PID", 0).unwrap();
        assert!(a.get("PID").unwrap().is_empty());

        let mut b = lenient_message();
        b.set("PID", pid).unwrap();
        assert_eq!(
            b.first("PID/PID_5/XPN_1/FN_1").unwrap().unwrap().value(),
            Some("EVERYMAN")
        );
    }

    #[test]
    fn test_set_replaces_repetition_zero() {
        let mut m = lenient_message();
        m.set_value("PID/PID_8", "M").unwrap();
        let mut replacement =
            Element::segment("PID", Version::V2_5, ValidationLevel::Lenient).unwrap();
        replacement.set_value("PID_8", "F").unwrap();
        m.set("PID", replacement).unwrap();
        let reps = m.get("PID").unwrap();
        assert_eq!(reps.len(), 1);
        assert_eq!(m.first("PID/PID_8").unwrap().unwrap().value(), Some("F"));
    }

    #[test]
    fn test_segment_string_assignment_sub_parses() {
        let mut m = lenient_message();
        m.set_value("PID", "PID|1||12345^^^HOSP^MR||EVERYMAN^ADAM").unwrap();
        assert_eq!(
            m.first("PID/PID_3/CX_1").unwrap().unwrap().value(),
            Some("12345")
        );
        assert_eq!(
            m.first("PID/PID_5/XPN_2").unwrap().unwrap().value(),
            Some("ADAM")
        );
    }

    #[test]
    fn test_segment_string_assignment_name_mismatch() {
        let mut m = lenient_message();
        let err = m.set_value("PID", "NK1|1").unwrap_err();
        assert!(matches!(err, Error::OperationNotAllowed(_)));
    }

    #[test]
    fn test_scalar_assignment_decodes_escapes() {
        let mut m = lenient_message();
        m.set_value("PID/PID_19", "123\\F\\456").unwrap();
        assert_eq!(
            m.first("PID/PID_19").unwrap().unwrap().value(),
            Some("123|456")
        );
    }

    #[test]
    fn test_anonymous_rejected_in_strict() {
        assert!(Element::anonymous(
            ElementKind::Field,
            Version::V2_5,
            ValidationLevel::Strict
        )
        .is_err());
        assert!(Element::anonymous(
            ElementKind::Field,
            Version::V2_5,
            ValidationLevel::Lenient
        )
        .is_ok());
    }

    #[test]
    fn test_lenient_unknown_child_stored_verbatim() {
        let mut m = lenient_message();
        m.set_value("ZBE/ZBE_1", "movement").unwrap();
        assert_eq!(
            m.first("ZBE/ZBE_1").unwrap().unwrap().value(),
            Some("movement")
        );
    }

    #[test]
    fn test_set_delimiters_updates_msh() {
        let mut m = lenient_message();
        let custom = Delimiters::new(b'!', b'@', b'%', b'~', b'$').unwrap();
        m.set_delimiters(custom);
        assert_eq!(m.first("MSH/MSH_1").unwrap().unwrap().value(), Some("!"));
        assert_eq!(m.first("MSH/MSH_2").unwrap().unwrap().value(), Some("@~$%"));
        assert_eq!(m.effective_delimiters(), custom);
    }

    #[test]
    fn test_effective_delimiters_follow_msh_mutation() {
        let mut m = lenient_message();
        m.set_value("MSH/MSH_2", "@~\\&").unwrap();
        assert_eq!(m.effective_delimiters().component, b'@');
    }

    #[test]
    fn test_serde_round_trip() {
        let mut m = lenient_message();
        m.set_value("PID/PID_5_1", "EVERYMAN").unwrap();
        let json = serde_json::to_string(&m).unwrap();
        let back: Element = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.first("PID/PID_5/XPN_1/FN_1").unwrap().unwrap().value(),
            Some("EVERYMAN")
        );
    }
}
