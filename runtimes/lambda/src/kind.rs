use sam_local_shared::AdapterError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_IMAGE_REPOSITORY: &str = "lambci/lambda";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    NodeJs,
    NodeJs43,
    NodeJs610,
    NodeJs810,
    Python27,
    Python36,
    Java8,
    Go1x,
    DotNetCore20,
    DotNetCore21,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RuntimeFamily {
    Node,
    Python,
    Java,
    Go,
    DotNet,
}

impl RuntimeKind {
    pub const ALL: [RuntimeKind; 10] = [
        RuntimeKind::NodeJs,
        RuntimeKind::NodeJs43,
        RuntimeKind::NodeJs610,
        RuntimeKind::NodeJs810,
        RuntimeKind::Python27,
        RuntimeKind::Python36,
        RuntimeKind::Java8,
        RuntimeKind::Go1x,
        RuntimeKind::DotNetCore20,
        RuntimeKind::DotNetCore21,
    ];

    /// The identifier used in templates and as the image tag.
    pub fn identifier(&self) -> &'static str {
        match self {
            RuntimeKind::NodeJs => "nodejs",
            RuntimeKind::NodeJs43 => "nodejs4.3",
            RuntimeKind::NodeJs610 => "nodejs6.10",
            RuntimeKind::NodeJs810 => "nodejs8.10",
            RuntimeKind::Python27 => "python2.7",
            RuntimeKind::Python36 => "python3.6",
            RuntimeKind::Java8 => "java8",
            RuntimeKind::Go1x => "go1.x",
            RuntimeKind::DotNetCore20 => "dotnetcore2.0",
            RuntimeKind::DotNetCore21 => "dotnetcore2.1",
        }
    }

    pub fn family(&self) -> RuntimeFamily {
        match self {
            RuntimeKind::NodeJs
            | RuntimeKind::NodeJs43
            | RuntimeKind::NodeJs610
            | RuntimeKind::NodeJs810 => RuntimeFamily::Node,
            RuntimeKind::Python27 | RuntimeKind::Python36 => RuntimeFamily::Python,
            RuntimeKind::Java8 => RuntimeFamily::Java,
            RuntimeKind::Go1x => RuntimeFamily::Go,
            RuntimeKind::DotNetCore20 | RuntimeKind::DotNetCore21 => RuntimeFamily::DotNet,
        }
    }

    pub fn image(&self, repository: &str) -> String {
        format!("{}:{}", repository, self.identifier())
    }

    /// Entrypoint that starts the runtime with a debugger listening on `port`.
    ///
    /// Heap limits follow the function's memory size the way the hosted
    /// runtimes size them. `None` means the runtime has no debug entrypoint
    /// and the port is only published.
    pub fn debug_entrypoint(&self, port: u16, memory_mb: u32) -> Option<Vec<String>> {
        let memory = u64::from(memory_mb);
        let node_flags = || {
            vec![
                "--nolazy".to_string(),
                format!("--max-old-space-size={}", memory * 90 / 100),
                format!("--max-semi-space-size={}", (memory * 5 / 100).max(1)),
                format!("--max-executable-size={}", (memory * 10 / 100).max(1)),
                "/var/runtime/node_modules/awslambda/index.js".to_string(),
            ]
        };

        let entrypoint = match self {
            RuntimeKind::NodeJs => {
                let mut args = vec!["/usr/bin/node".to_string(), format!("--debug-brk={}", port)];
                args.extend(node_flags());
                args
            }
            RuntimeKind::NodeJs43 => {
                let mut args = vec![
                    "/usr/local/lib64/node-v4.3.x/bin/node".to_string(),
                    format!("--debug-brk={}", port),
                ];
                args.extend(node_flags());
                args
            }
            RuntimeKind::NodeJs610 => {
                let mut args = vec![
                    "/var/lang/bin/node".to_string(),
                    format!("--inspect={}", port),
                    "--debug-brk".to_string(),
                ];
                args.extend(node_flags());
                args
            }
            RuntimeKind::NodeJs810 => {
                let mut args = vec![
                    "/var/lang/bin/node".to_string(),
                    format!("--inspect-brk=0.0.0.0:{}", port),
                ];
                args.extend(node_flags());
                args
            }
            // ptvsd is attached from the function code itself
            RuntimeKind::Python27 => vec![
                "/usr/bin/python2.7".to_string(),
                "/var/runtime/awslambda/bootstrap.py".to_string(),
            ],
            RuntimeKind::Python36 => vec![
                "/var/lang/bin/python3.6".to_string(),
                "/var/runtime/awslambda/bootstrap.py".to_string(),
            ],
            RuntimeKind::Java8 => vec![
                "/usr/bin/java".to_string(),
                format!(
                    "-agentlib:jdwp=transport=dt_socket,server=y,suspend=y,quiet=y,address={}",
                    port
                ),
                format!("-XX:MaxHeapSize={}k", memory * 1024 * 85 / 100),
                format!("-XX:MaxMetaspaceSize={}k", memory * 1024 * 10 / 100),
                format!("-XX:ReservedCodeCacheSize={}k", memory * 1024 * 5 / 100),
                "-XX:+UseSerialGC".to_string(),
                "-Xshare:on".to_string(),
                "-XX:-TieredCompilation".to_string(),
                "-jar".to_string(),
                "/var/runtime/lib/LambdaJavaRTEntry-1.0.jar".to_string(),
            ],
            RuntimeKind::Go1x | RuntimeKind::DotNetCore20 | RuntimeKind::DotNetCore21 => {
                return None;
            }
        };

        Some(entrypoint)
    }
}

impl FromStr for RuntimeKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        RuntimeKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.identifier().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AdapterError::UnsupportedRuntime(s.to_string()))
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}
