//! Declarative tool specifications.
//!
//! Instead of decorator stacks, an agent builds an [`AgentDeclaration`] at
//! startup: plain [`ToolSpec`] records describing the MCP-facing function,
//! enriched with an optional [`MeshBinding`] (the mesh identity other
//! agents depend on, plus this function's own dependencies) and an
//! optional [`LlmBinding`] (a dependency on an llm-provider capability).
//! The runtime iterates the declaration; nothing is discovered by
//! scanning.

use serde_json::Value;

use mesh_core::types::{AgentInfo, AgentType, Capability, DependencySpec};

/// The MCP-facing part of one tool: what `tools/list` advertises.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub function_name: String,
    pub description: Option<String>,
    pub schema: Option<Value>,
}

impl ToolSpec {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            description: None,
            schema: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// The mesh identity of a tool: the capability name other agents target,
/// its version and tags, and the dependencies to inject.
#[derive(Debug, Clone)]
pub struct MeshBinding {
    pub capability: String,
    pub version: String,
    pub tags: Vec<String>,
    pub dependencies: Vec<DependencySpec>,
}

impl MeshBinding {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            version: "1.0.0".to_string(),
            tags: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Declare a dependency to be resolved into `parameter_name`.
    pub fn dependency(mut self, spec: DependencySpec) -> Self {
        self.dependencies.push(spec);
        self
    }
}

/// Marks a tool as LLM-backed: the runtime adds a dependency on an
/// llm-provider capability, bound to the `llm` parameter.
#[derive(Debug, Clone)]
pub struct LlmBinding {
    pub provider_capability: String,
    pub tags: Vec<String>,
    pub version: Option<String>,
}

/// Parameter name the LLM provider handle binds to.
pub const LLM_PARAMETER: &str = "llm";

impl Default for LlmBinding {
    fn default() -> Self {
        Self {
            provider_capability: "llm-provider".to_string(),
            tags: Vec::new(),
            version: None,
        }
    }
}

impl LlmBinding {
    pub fn provider(mut self, capability: impl Into<String>) -> Self {
        self.provider_capability = capability.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    fn as_dependency(&self) -> DependencySpec {
        DependencySpec {
            capability: self.provider_capability.clone(),
            tags: self.tags.clone(),
            version: self.version.clone(),
            namespace: None,
            parameter_name: LLM_PARAMETER.to_string(),
        }
    }
}

/// One fully declared tool.
#[derive(Debug, Clone)]
pub struct DeclaredTool {
    pub spec: ToolSpec,
    pub mesh: Option<MeshBinding>,
    pub llm: Option<LlmBinding>,
}

impl DeclaredTool {
    /// The wire capability this tool registers as.
    pub fn to_capability(&self, agent_type: AgentType) -> Capability {
        let mesh = self.mesh.clone().unwrap_or_else(|| {
            // Without an explicit binding the capability name defaults to
            // the function name.
            MeshBinding::new(self.spec.function_name.clone())
        });
        let mut dependencies = mesh.dependencies;
        if let Some(llm) = &self.llm {
            dependencies.push(llm.as_dependency());
        }
        Capability {
            function_name: self.spec.function_name.clone(),
            capability: mesh.capability,
            version: mesh.version,
            tags: mesh.tags,
            dependencies,
            description: self.spec.description.clone(),
            schema: self.spec.schema.clone(),
            agent_type_hint: Some(agent_type),
        }
    }
}

/// Everything an agent tells the registry about itself.
#[derive(Debug, Clone)]
pub struct AgentDeclaration {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub namespace: String,
    pub agent_type: AgentType,
    pub endpoint: String,
    pub tools: Vec<DeclaredTool>,
}

impl AgentDeclaration {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "0.1.0".to_string(),
            description: None,
            namespace: "default".to_string(),
            agent_type: AgentType::Tool,
            endpoint: endpoint.into(),
            tools: Vec::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn agent_type(mut self, agent_type: AgentType) -> Self {
        self.agent_type = agent_type;
        self
    }

    pub fn tool(mut self, spec: ToolSpec, mesh: Option<MeshBinding>, llm: Option<LlmBinding>) -> Self {
        if llm.is_some() && self.agent_type == AgentType::Tool {
            self.agent_type = AgentType::LlmAgent;
        }
        self.tools.push(DeclaredTool { spec, mesh, llm });
        self
    }

    pub fn agent_info(&self, id: Option<mesh_core::id::AgentId>) -> AgentInfo {
        AgentInfo {
            id,
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            endpoint: self.endpoint.clone(),
            namespace: self.namespace.clone(),
            agent_type: self.agent_type,
        }
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.tools
            .iter()
            .map(|tool| tool.to_capability(self.agent_type))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capability_defaults_to_function_name() {
        let declaration = AgentDeclaration::new("hello", "http://localhost:9090")
            .tool(ToolSpec::new("say_hello"), None, None);
        let caps = declaration.capabilities();
        assert_eq!(caps[0].capability, "say_hello");
        assert_eq!(caps[0].version, "1.0.0");
    }

    #[test]
    fn test_mesh_binding_carries_dependencies() {
        let binding = MeshBinding::new("greeting")
            .version("2.1.0")
            .tag("friendly")
            .tag("+fast")
            .dependency(DependencySpec {
                capability: "date_service".to_string(),
                tags: vec!["system".to_string()],
                version: Some(">=1.0,<2.0".to_string()),
                namespace: None,
                parameter_name: "date_service".to_string(),
            });
        let declaration = AgentDeclaration::new("hello", "http://localhost:9090").tool(
            ToolSpec::new("say_hello")
                .description("greets politely")
                .schema(json!({"type": "object"})),
            Some(binding),
            None,
        );
        let cap = &declaration.capabilities()[0];
        assert_eq!(cap.capability, "greeting");
        assert_eq!(cap.version, "2.1.0");
        assert_eq!(cap.tags, vec!["friendly", "+fast"]);
        assert_eq!(cap.dependencies.len(), 1);
        assert_eq!(cap.description.as_deref(), Some("greets politely"));
    }

    #[test]
    fn test_llm_binding_adds_provider_dependency() {
        let declaration = AgentDeclaration::new("writer", "http://localhost:9091").tool(
            ToolSpec::new("draft"),
            None,
            Some(LlmBinding::default().tag("claude")),
        );
        assert_eq!(declaration.agent_type, AgentType::LlmAgent);
        let cap = &declaration.capabilities()[0];
        let llm_dep = cap
            .dependencies
            .iter()
            .find(|d| d.parameter_name == LLM_PARAMETER)
            .unwrap();
        assert_eq!(llm_dep.capability, "llm-provider");
        assert_eq!(llm_dep.tags, vec!["claude"]);
    }
}
