//! Build tool command lines.
//!
//! Target-specific pieces come from closed tables. A target missing from a
//! table contributes nothing and is logged as an error; no other target's
//! flag is substituted.

use herd_common::{BuildTarget, ProjectDescriptor};
use std::path::{Path, PathBuf};
use tracing::error;

/// Flags every headless build run starts with.
pub const COMMON_FLAGS: [&str; 5] = ["-nographics", "-batchmode", "-quit", "-logFile", "-"];

/// A program and its argv, run without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Shell-quoted rendering for logs and artifacts.
    pub fn display(&self) -> String {
        let mut rendered = shell_escape::escape(self.program.to_string_lossy()).into_owned();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&shell_escape::escape(arg.as_str().into()));
        }
        rendered
    }
}

const WINDOWS_PLAYER: &[&str] = &["-buildWindowsPlayer"];
const WINDOWS64_PLAYER: &[&str] = &["-buildWindows64Player"];
const LINUX_PLAYER: &[&str] = &["-buildLinux64Player"];
const MAC_PLAYER: &[&str] = &["-buildOSXUniversalPlayer"];
const WINDOWS_SERVER: &[&str] = &["-buildWindows64Player", "-standaloneBuildSubtarget", "Server"];
const LINUX_SERVER: &[&str] = &["-buildLinux64Player", "-standaloneBuildSubtarget", "Server"];

/// Player build flags for `target`.
pub fn player_flags(target: BuildTarget) -> Option<&'static [&'static str]> {
    match target {
        BuildTarget::Windows => Some(WINDOWS_PLAYER),
        BuildTarget::Windows64 => Some(WINDOWS64_PLAYER),
        BuildTarget::Linux => Some(LINUX_PLAYER),
        BuildTarget::Mac => Some(MAC_PLAYER),
        BuildTarget::WindowsServer => Some(WINDOWS_SERVER),
        BuildTarget::LinuxServer => Some(LINUX_SERVER),
        BuildTarget::Android | BuildTarget::Ios => None,
    }
}

/// Executable extension of a player build, including the dot.
pub fn player_extension(target: BuildTarget) -> &'static str {
    match target {
        BuildTarget::Windows | BuildTarget::Windows64 | BuildTarget::WindowsServer => ".exe",
        BuildTarget::Mac => ".app",
        BuildTarget::Linux | BuildTarget::LinuxServer => ".x86_64",
        BuildTarget::Android => ".apk",
        BuildTarget::Ios => "",
    }
}

/// Suffix of the `BuildHotUpdateFor<Suffix>` entry method.
pub fn hot_update_suffix(target: BuildTarget) -> Option<&'static str> {
    match target {
        BuildTarget::Windows64 => Some("Windows64"),
        BuildTarget::Linux => Some("Linux"),
        BuildTarget::Android => Some("Android"),
        BuildTarget::Ios => Some("iOS"),
        BuildTarget::Windows
        | BuildTarget::Mac
        | BuildTarget::WindowsServer
        | BuildTarget::LinuxServer => None,
    }
}

/// `<player_build_output>/<target>/<timestamp>/<name><ext>`.
pub fn player_output_path(
    project: &ProjectDescriptor,
    target: BuildTarget,
    timestamp: i64,
) -> PathBuf {
    project
        .player_build_output
        .join(target.as_str())
        .join(timestamp.to_string())
        .join(format!("{}{}", project.name, player_extension(target)))
}

fn base_args(project: &ProjectDescriptor) -> Vec<String> {
    let mut args: Vec<String> = COMMON_FLAGS.iter().map(|f| f.to_string()).collect();
    args.push("-projectPath".to_string());
    args.push(project.source_path.to_string_lossy().into_owned());
    args
}

pub fn player_command(
    tool: &Path,
    project: &ProjectDescriptor,
    target: BuildTarget,
    timestamp: i64,
) -> CommandSpec {
    let mut args = base_args(project);
    match player_flags(target) {
        Some(flags) => args.extend(flags.iter().map(|f| f.to_string())),
        None => error!(
            "No player build flag for target {}; building {} without one",
            target, project.name
        ),
    }
    args.push(
        player_output_path(project, target, timestamp)
            .to_string_lossy()
            .into_owned(),
    );
    CommandSpec {
        program: tool.to_path_buf(),
        args,
    }
}

pub fn hot_update_command(
    tool: &Path,
    project: &ProjectDescriptor,
    target: BuildTarget,
    entry_class: &str,
) -> CommandSpec {
    let mut args = base_args(project);
    match hot_update_suffix(target) {
        Some(suffix) => {
            args.push("-executeMethod".to_string());
            args.push(format!("{entry_class}.BuildHotUpdateFor{suffix}"));
        }
        None => error!(
            "No hot update entry point for target {}; building {} without one",
            target, project.name
        ),
    }
    CommandSpec {
        program: tool.to_path_buf(),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_common::SourceControlKind;

    fn project() -> ProjectDescriptor {
        ProjectDescriptor {
            name: "Game".to_string(),
            source_path: PathBuf::from("/work/game"),
            tool_version: "2022.3.10f1".to_string(),
            player_build_output: PathBuf::from("/builds/game"),
            addressable_build_output: PathBuf::from("/builds/game/ServerData"),
            source_control: SourceControlKind::None,
            branch: None,
            notification_target: None,
            deployment: Vec::new(),
        }
    }

    #[test]
    fn every_target_has_an_extension_entry() {
        for target in BuildTarget::ALL {
            let ext = player_extension(target);
            assert!(ext.is_empty() || ext.starts_with('.'), "{target}: {ext}");
        }
        assert_eq!(player_extension(BuildTarget::Ios), "");
    }

    #[test]
    fn player_flags_cover_desktop_targets_only() {
        for target in BuildTarget::ALL {
            let has_flag = player_flags(target).is_some();
            let mobile = matches!(target, BuildTarget::Android | BuildTarget::Ios);
            assert_eq!(has_flag, !mobile, "{target}");
        }
        assert_eq!(
            player_flags(BuildTarget::LinuxServer),
            Some(&["-buildLinux64Player", "-standaloneBuildSubtarget", "Server"][..])
        );
    }

    #[test]
    fn hot_update_entries() {
        let supported: Vec<BuildTarget> = BuildTarget::ALL
            .into_iter()
            .filter(|t| hot_update_suffix(*t).is_some())
            .collect();
        assert_eq!(
            supported,
            vec![
                BuildTarget::Windows64,
                BuildTarget::Linux,
                BuildTarget::Android,
                BuildTarget::Ios
            ]
        );
    }

    #[test]
    fn windows64_player_command_line() {
        let spec = player_command(
            Path::new("/opt/unity/Editor/Unity"),
            &project(),
            BuildTarget::Windows64,
            1_700_000_000,
        );
        assert_eq!(spec.program, PathBuf::from("/opt/unity/Editor/Unity"));
        assert_eq!(
            spec.args,
            vec![
                "-nographics",
                "-batchmode",
                "-quit",
                "-logFile",
                "-",
                "-projectPath",
                "/work/game",
                "-buildWindows64Player",
                "/builds/game/Windows64/1700000000/Game.exe",
            ]
        );
    }

    #[test]
    fn android_player_command_has_no_flag() {
        let spec = player_command(
            Path::new("unity"),
            &project(),
            BuildTarget::Android,
            42,
        );
        assert!(!spec.args.iter().any(|a| a.starts_with("-build")));
        assert_eq!(
            spec.args.last().map(String::as_str),
            Some("/builds/game/Android/42/Game.apk")
        );
    }

    #[test]
    fn hot_update_command_uses_entry_class() {
        let spec = hot_update_command(
            Path::new("unity"),
            &project(),
            BuildTarget::Ios,
            "JenkinsBuild",
        );
        assert_eq!(
            &spec.args[spec.args.len() - 2..],
            &["-executeMethod", "JenkinsBuild.BuildHotUpdateForiOS"]
        );

        let unsupported = hot_update_command(
            Path::new("unity"),
            &project(),
            BuildTarget::Mac,
            "JenkinsBuild",
        );
        assert!(!unsupported.args.iter().any(|a| a == "-executeMethod"));
    }

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let spec = CommandSpec {
            program: PathBuf::from("/opt/Unity Hub/Unity"),
            args: vec!["-projectPath".to_string(), "/work/my game".to_string()],
        };
        assert_eq!(
            spec.display(),
            "'/opt/Unity Hub/Unity' -projectPath '/work/my game'"
        );
    }
}
