use std::fmt;

use wgpu::naga::front::glsl::{Frontend, Options};
use wgpu::naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use wgpu::naga::{Binding, Handle, Module, ShaderStage, Type, TypeInner};

use crate::error::{RenderError, StageKind};

/// Bind group holding the scalar/vector uniform blocks.
pub(crate) const UNIFORM_GROUP: u32 = 0;
/// Bind group holding the channel texture/sampler pairs.
pub(crate) const CHANNEL_GROUP: u32 = 1;

/// The fixed uniform names every program is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformName {
    Resolution,
    GlobalTime,
    Random,
    Channel0,
    Channel1,
}

impl UniformName {
    pub const ALL: [UniformName; 5] = [
        UniformName::Resolution,
        UniformName::GlobalTime,
        UniformName::Random,
        UniformName::Channel0,
        UniformName::Channel1,
    ];

    pub fn glsl_name(self) -> &'static str {
        match self {
            UniformName::Resolution => "iResolution",
            UniformName::GlobalTime => "iGlobalTime",
            UniformName::Random => "iRandom",
            UniformName::Channel0 => "iChannel0",
            UniformName::Channel1 => "iChannel1",
        }
    }

    fn index(self) -> usize {
        match self {
            UniformName::Resolution => 0,
            UniformName::GlobalTime => 1,
            UniformName::Random => 2,
            UniformName::Channel0 => 3,
            UniformName::Channel1 => 4,
        }
    }

    /// Bind group and binding of the resource backing this name. Channels
    /// resolve through their texture binding; the sampler sits one above.
    pub(crate) fn resource_binding(self) -> (u32, u32) {
        match self {
            UniformName::Resolution => (UNIFORM_GROUP, 0),
            UniformName::GlobalTime => (UNIFORM_GROUP, 1),
            UniformName::Random => (UNIFORM_GROUP, 2),
            UniformName::Channel0 => (CHANNEL_GROUP, 0),
            UniformName::Channel1 => (CHANNEL_GROUP, 2),
        }
    }
}

impl fmt::Display for UniformName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glsl_name())
    }
}

/// Where a uniform name landed in a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformSlot {
    /// The program reads this uniform from the given bind group/binding.
    Bound { group: u32, binding: u32 },
    /// The program never reads this uniform; writes to it are dropped.
    Absent,
}

impl UniformSlot {
    pub fn is_bound(self) -> bool {
        matches!(self, UniformSlot::Bound { .. })
    }
}

impl fmt::Display for UniformSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniformSlot::Bound { group, binding } => write!(f, "set {group}, binding {binding}"),
            UniformSlot::Absent => f.write_str("absent"),
        }
    }
}

/// Resolved slot for each of the fixed uniform names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformSlots {
    slots: [UniformSlot; 5],
}

impl UniformSlots {
    pub fn get(&self, name: UniformName) -> UniformSlot {
        self.slots[name.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (UniformName, UniformSlot)> + '_ {
        UniformName::ALL
            .into_iter()
            .map(move |name| (name, self.get(name)))
    }

    fn from_used(used: &[(u32, u32)]) -> Self {
        let mut slots = [UniformSlot::Absent; 5];
        for name in UniformName::ALL {
            let (group, binding) = name.resource_binding();
            if used.contains(&(group, binding)) {
                slots[name.index()] = UniformSlot::Bound { group, binding };
            }
        }
        Self { slots }
    }
}

/// A vertex/fragment pair that parsed, validated and linked, ready to be
/// turned into GPU shader modules.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub label: String,
    pub vertex_source: String,
    pub fragment_source: String,
    pub slots: UniformSlots,
}

/// Compiles both stages, links them and resolves the fixed uniform names.
///
/// Any diagnostic from the GLSL front-end or the validator fails the whole
/// program; there is no partially usable result.
pub fn compile_program(
    label: &str,
    vertex_source: &str,
    fragment_source: &str,
) -> Result<CompiledProgram, RenderError> {
    let vertex_wrapped = wrap_stage_source(vertex_source);
    let fragment_wrapped = wrap_stage_source(fragment_source);

    let (vertex_module, vertex_info) = parse_stage(label, StageKind::Vertex, &vertex_wrapped)?;
    let (fragment_module, fragment_info) =
        parse_stage(label, StageKind::Fragment, &fragment_wrapped)?;

    link_stages(label, &vertex_module, &fragment_module)?;

    let mut used = used_bindings(&vertex_module, &vertex_info);
    used.extend(used_bindings(&fragment_module, &fragment_info));
    let slots = UniformSlots::from_used(&used);

    tracing::debug!(
        program = label,
        resolution = %slots.get(UniformName::Resolution),
        global_time = %slots.get(UniformName::GlobalTime),
        random = %slots.get(UniformName::Random),
        channel0 = %slots.get(UniformName::Channel0),
        channel1 = %slots.get(UniformName::Channel1),
        "linked program"
    );

    Ok(CompiledProgram {
        label: label.to_string(),
        vertex_source: vertex_wrapped,
        fragment_source: fragment_wrapped,
        slots,
    })
}

/// Produces the GLSL handed to the compiler for one stage.
///
/// Steps performed:
///
/// 1. Strip the first `#version` directive and any `uniform` declaration of
///    one of the fixed names, so the caller may keep desktop-GL style
///    declarations in their sources.
/// 2. Prepend [`PRELUDE`], which declares the uniform blocks and channel
///    bindings under the fixed names.
pub(crate) fn wrap_stage_source(source: &str) -> String {
    let mut sanitized = String::with_capacity(source.len());
    let mut skipped_version = false;
    for line in source.lines() {
        let trimmed = line.trim_start();
        if !skipped_version && trimmed.starts_with("#version") {
            skipped_version = true;
            continue;
        }
        if declares_fixed_uniform(trimmed) {
            continue;
        }
        sanitized.push_str(line);
        sanitized.push('\n');
    }

    format!("{PRELUDE}#line 1\n{sanitized}")
}

fn declares_fixed_uniform(trimmed: &str) -> bool {
    if !trimmed.starts_with("uniform ") {
        return false;
    }
    let declaration = trimmed.split("//").next().unwrap_or(trimmed);
    declaration
        .split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .any(|token| UniformName::ALL.iter().any(|name| name.glsl_name() == token))
}

fn parse_stage(
    program: &str,
    stage: StageKind,
    wrapped: &str,
) -> Result<(Module, ModuleInfo), RenderError> {
    let naga_stage = match stage {
        StageKind::Vertex => ShaderStage::Vertex,
        StageKind::Fragment => ShaderStage::Fragment,
    };

    let mut frontend = Frontend::default();
    let module = frontend
        .parse(&Options::from(naga_stage), wrapped)
        .map_err(|errors| RenderError::Compile {
            program: program.to_string(),
            stage,
            log: errors.to_string(),
        })?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::default())
        .validate(&module)
        .map_err(|error| RenderError::Compile {
            program: program.to_string(),
            stage,
            log: error_chain(&error),
        })?;

    Ok((module, info))
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut log = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        log.push_str(": ");
        log.push_str(&cause.to_string());
        source = cause.source();
    }
    log
}

/// Resource bindings read by any entry point of the module.
fn used_bindings(module: &Module, info: &ModuleInfo) -> Vec<(u32, u32)> {
    let mut used = Vec::new();
    for index in 0..module.entry_points.len() {
        let function_info = info.get_entry_point(index);
        for (handle, variable) in module.global_variables.iter() {
            let Some(binding) = &variable.binding else {
                continue;
            };
            if !function_info[handle].is_empty() {
                used.push((binding.group, binding.binding));
            }
        }
    }
    used
}

#[derive(Debug, Clone, PartialEq)]
struct InterfaceSlot {
    location: u32,
    inner: TypeInner,
}

fn link_stages(label: &str, vertex: &Module, fragment: &Module) -> Result<(), RenderError> {
    let link_error = |log: String| RenderError::Link {
        program: label.to_string(),
        log,
    };

    let vertex_entry = vertex
        .entry_points
        .iter()
        .find(|entry| entry.stage == ShaderStage::Vertex)
        .ok_or_else(|| link_error("vertex stage has no entry point".into()))?;
    let fragment_entry = fragment
        .entry_points
        .iter()
        .find(|entry| entry.stage == ShaderStage::Fragment)
        .ok_or_else(|| link_error("fragment stage has no entry point".into()))?;

    let mut outputs = Vec::new();
    if let Some(result) = &vertex_entry.function.result {
        collect_interface(vertex, result.ty, result.binding.as_ref(), &mut outputs);
    }
    let mut inputs = Vec::new();
    for argument in &fragment_entry.function.arguments {
        collect_interface(fragment, argument.ty, argument.binding.as_ref(), &mut inputs);
    }

    let mut problems = Vec::new();
    for input in &inputs {
        match outputs.iter().find(|output| output.location == input.location) {
            None => problems.push(format!(
                "fragment input at location {} ({}) is not written by the vertex stage",
                input.location,
                describe_type(&input.inner)
            )),
            Some(output) if output.inner != input.inner => problems.push(format!(
                "location {} is {} in the vertex stage but {} in the fragment stage",
                input.location,
                describe_type(&output.inner),
                describe_type(&input.inner)
            )),
            Some(_) => {}
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(link_error(problems.join("\n")))
    }
}

fn collect_interface(
    module: &Module,
    ty: Handle<Type>,
    binding: Option<&Binding>,
    out: &mut Vec<InterfaceSlot>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => out.push(InterfaceSlot {
            location: *location,
            inner: module.types[ty].inner.clone(),
        }),
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_interface(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

fn describe_type(inner: &TypeInner) -> String {
    match inner {
        TypeInner::Scalar(scalar) => format!("{:?}{}", scalar.kind, scalar.width * 8),
        TypeInner::Vector { size, scalar } => {
            format!("vec{}<{:?}{}>", *size as u8, scalar.kind, scalar.width * 8)
        }
        other => format!("{other:?}"),
    }
}

/// GLSL prologue injected ahead of every stage.
///
/// Each scalar uniform lives in its own block so that reflection can tell
/// which names a program actually reads. Block members are visible under
/// their plain names because the blocks have no instance name.
const PRELUDE: &str = r"#version 450
layout(std140, set = 0, binding = 0) uniform ScenepassResolution { vec3 iResolution; };
layout(std140, set = 0, binding = 1) uniform ScenepassGlobalTime { float iGlobalTime; };
layout(std140, set = 0, binding = 2) uniform ScenepassRandom { float iRandom; };

layout(set = 1, binding = 0) uniform texture2D scenepass_channel0_texture;
layout(set = 1, binding = 1) uniform sampler scenepass_channel0_sampler;
layout(set = 1, binding = 2) uniform texture2D scenepass_channel1_texture;
layout(set = 1, binding = 3) uniform sampler scenepass_channel1_sampler;

#define iChannel0 sampler2D(scenepass_channel0_texture, scenepass_channel0_sampler)
#define iChannel1 sampler2D(scenepass_channel1_texture, scenepass_channel1_sampler)
";

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = r"#version 410
layout(location = 0) in vec2 position;
layout(location = 0) out vec2 uvCoord;
void main() {
    uvCoord = position * 0.5 + vec2(0.5);
    gl_Position = vec4(position, 0.0, 1.0);
}
";

    const FRAGMENT_ALL: &str = r"#version 410
layout(location = 0) in vec2 uvCoord;
layout(location = 0) out vec4 color;
void main() {
    vec2 uv = gl_FragCoord.xy / iResolution.xy;
    float grain = texture(iChannel0, uv).r * iRandom;
    vec3 base = texture(iChannel1, uvCoord).rgb;
    color = vec4(base + vec3(grain * sin(iGlobalTime)), 1.0);
}
";

    const FRAGMENT_TIME_ONLY: &str = r"
layout(location = 0) in vec2 uvCoord;
layout(location = 0) out vec4 color;
void main() {
    color = vec4(vec3(fract(iGlobalTime)), 1.0);
}
";

    #[test]
    fn resolves_every_used_uniform() {
        let program = compile_program("all", VERTEX, FRAGMENT_ALL).expect("compiles");
        for name in UniformName::ALL {
            assert!(program.slots.get(name).is_bound(), "{name} should be bound");
        }
        assert_eq!(
            program.slots.get(UniformName::Channel1),
            UniformSlot::Bound {
                group: CHANNEL_GROUP,
                binding: 2
            }
        );
    }

    #[test]
    fn unused_uniforms_resolve_to_absent() {
        let program = compile_program("time", VERTEX, FRAGMENT_TIME_ONLY).expect("compiles");
        assert!(program.slots.get(UniformName::GlobalTime).is_bound());
        for name in [
            UniformName::Resolution,
            UniformName::Random,
            UniformName::Channel0,
            UniformName::Channel1,
        ] {
            assert_eq!(program.slots.get(name), UniformSlot::Absent, "{name}");
        }
        assert_eq!(program.slots.iter().count(), UniformName::ALL.len());
    }

    #[test]
    fn syntax_error_fails_fragment_compile() {
        let broken = r"
layout(location = 0) out vec4 color;
void main() {
    color = vec4(1.0;
}
";
        let err = compile_program("broken", VERTEX, broken).unwrap_err();
        match err {
            RenderError::Compile { program, stage, log } => {
                assert_eq!(program, "broken");
                assert_eq!(stage, StageKind::Fragment);
                assert!(!log.is_empty());
            }
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn missing_vertex_output_fails_link() {
        let fragment = r"
layout(location = 0) in vec2 uvCoord;
layout(location = 1) in vec3 normal;
layout(location = 0) out vec4 color;
void main() {
    color = vec4(normal, uvCoord.x);
}
";
        let err = compile_program("mismatch", VERTEX, fragment).unwrap_err();
        match err {
            RenderError::Link { log, .. } => assert!(log.contains("location 1"), "{log}"),
            other => panic!("expected link error, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_interface_type_fails_link() {
        let fragment = r"
layout(location = 0) in vec3 uvCoord;
layout(location = 0) out vec4 color;
void main() {
    color = vec4(uvCoord, 1.0);
}
";
        assert!(matches!(
            compile_program("types", VERTEX, fragment),
            Err(RenderError::Link { .. })
        ));
    }

    #[test]
    fn wrap_strips_fixed_uniform_declarations() {
        let source = r"#version 410
uniform vec3      iResolution;           // viewport resolution (in pixels)
uniform float     iGlobalTime;
uniform sampler2D iChannel0;
uniform float     iGlobalTimeScale;
void main() {}
";
        let wrapped = wrap_stage_source(source);
        assert!(!wrapped.contains("uniform vec3      iResolution"));
        assert!(!wrapped.contains("uniform sampler2D iChannel0"));
        assert!(!wrapped.contains("#version 410"));
        assert!(wrapped.contains("uniform float     iGlobalTimeScale"));
        assert!(wrapped.starts_with("#version 450"));
    }

    #[test]
    fn desktop_style_declarations_still_compile() {
        let fragment = r"#version 410
uniform float iGlobalTime;
uniform sampler2D iChannel0;
layout(location = 0) in vec2 uvCoord;
layout(location = 0) out vec4 color;
void main() {
    color = texture(iChannel0, uvCoord) * iGlobalTime;
}
";
        let program = compile_program("desktop", VERTEX, fragment).expect("compiles");
        assert!(program.slots.get(UniformName::Channel0).is_bound());
        assert!(!program.slots.get(UniformName::Channel1).is_bound());
    }
}
