use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::descriptor::{FieldDescriptor, GroupContent};
use crate::error::{Error, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTemplate {
    id: u32,
    name: String,
    fields: Vec<FieldDescriptor>,
}

/// A named message shape. Building one validates every descriptor and assigns the dictionary
/// slots the codec sessions use for previous values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTemplate", into = "RawTemplate")]
pub struct Template {
    id: u32,
    name: String,
    content: GroupContent,
    slots: usize,
}

impl Template {
    pub fn new(id: u32, name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Result<Self> {
        let name = name.into();
        let mut content = GroupContent::new(fields);
        let mut slots = 0;
        content.prepare(&mut slots).map_err(|e| e.at(&name))?;
        Ok(Self {
            id,
            name,
            content,
            slots,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &GroupContent {
        &self.content
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        self.content.fields()
    }

    /// Number of previous-value dictionary entries a session keeps for this template.
    pub fn dictionary_len(&self) -> usize {
        self.slots
    }

    /// Find a field by a dotted path of names, descending through groups and sequences.
    pub fn find_field(&self, path: &str) -> Option<&FieldDescriptor> {
        let mut content = &self.content;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let field = content.get(content.find_subinstruction_index_by_name(part)?)?;
            if parts.peek().is_none() {
                return Some(field);
            }
            content = field.content()?;
        }
        None
    }
}

impl TryFrom<RawTemplate> for Template {
    type Error = Error;

    fn try_from(raw: RawTemplate) -> Result<Self> {
        Template::new(raw.id, raw.name, raw.fields)
    }
}

impl From<Template> for RawTemplate {
    fn from(t: Template) -> Self {
        RawTemplate {
            id: t.id,
            name: t.name,
            fields: t.content.into(),
        }
    }
}

/// The template dictionary: every template a session may see on the wire, by id.
///
/// A registry is immutable once handed to a session, so one `Arc<TemplateRegistry>` can back any
/// number of sessions on any number of threads.
#[derive(Clone, Debug, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<u32, Template>,
    names: BTreeMap<String, u32>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of templates. Fails if two share an id or a name.
    pub fn from_templates(templates: impl IntoIterator<Item = Template>) -> Result<Self> {
        let mut registry = Self::new();
        for t in templates {
            registry.insert(t)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, template: Template) -> Result<()> {
        if self.templates.contains_key(&template.id) {
            return Err(Error::schema(format!("template id {} used twice", template.id)));
        }
        if self.names.contains_key(&template.name) {
            return Err(Error::schema(format!(
                "template name {} used twice",
                template.name
            )));
        }
        self.names.insert(template.name.clone(), template.id);
        self.templates.insert(template.id, template);
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&Template> {
        self.templates.get(&id)
    }

    pub fn find(&self, name: &str) -> Option<&Template> {
        self.names.get(name).and_then(|id| self.templates.get(id))
    }

    /// Look up a template, failing with a schema violation if it's unknown.
    pub fn require(&self, id: u32) -> Result<&Template> {
        self.get(id)
            .ok_or_else(|| Error::schema(format!("unknown template id {}", id)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
