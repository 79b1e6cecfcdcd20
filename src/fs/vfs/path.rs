//! Normalização de caminhos.

use alloc::string::String;
use alloc::vec::Vec;

/// Normaliza `path` contra o diretório `cwd` (absoluto): resolve `.`,
/// colapsa `..` e remove barras duplicadas. O resultado é sempre
/// absoluto e sem barra final (exceto a raiz).
pub fn normalize(cwd: &str, path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    let base = if path.starts_with('/') { "" } else { cwd };
    for component in base.split('/').chain(path.split('/')) {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return String::from("/");
    }

    let mut out = String::new();
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    out
}

/// Diretório pai de um caminho absoluto normalizado.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Último componente.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normaliza_relativo_e_pontos() {
        assert_eq!(normalize("/", "etc/hostname"), "/etc/hostname");
        assert_eq!(normalize("/usr/bin", "../lib"), "/usr/lib");
        assert_eq!(normalize("/usr", "./local/.."), "/usr");
        assert_eq!(normalize("/", "////a///b//"), "/a/b");
        assert_eq!(normalize("/a/b", "/c"), "/c");
    }

    #[test]
    fn colapsa_alem_da_raiz() {
        assert_eq!(normalize("/", "../../.."), "/");
        assert_eq!(normalize("/a", "../../b"), "/b");
    }

    #[test]
    fn pai_e_base() {
        assert_eq!(parent("/etc/hostname"), "/etc");
        assert_eq!(parent("/etc"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(basename("/etc/hostname"), "hostname");
    }
}
