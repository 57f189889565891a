//! 本地参考文档加载：txt / docx / pdf

use anyhow::{Context, Result, anyhow, bail};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command as TokioCommand;
use walkdir::WalkDir;

use crate::generator::context::GeneratorContext;
use crate::generator::types::ReferenceDoc;

const PDF_TEXT_TOOL: &str = "pdftotext";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Docx,
    Pdf,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" => Some(DocumentFormat::Text),
            "docx" => Some(DocumentFormat::Docx),
            "pdf" => Some(DocumentFormat::Pdf),
            _ => None,
        }
    }
}

/// 展开用户给出的路径（支持glob）与目录（不递归），去重并保持顺序
pub fn collect_paths(docs: &[PathBuf], folder: Option<&Path>) -> (Vec<PathBuf>, Vec<String>) {
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut warnings = Vec::new();
    fn push(path: PathBuf, paths: &mut Vec<PathBuf>) {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    for doc in docs {
        let raw = doc.to_string_lossy();
        if raw.contains(['*', '?', '[']) {
            match glob::glob(&raw) {
                Ok(entries) => {
                    let mut matched: Vec<PathBuf> = entries.flatten().filter(|p| p.is_file()).collect();
                    matched.sort();
                    if matched.is_empty() {
                        warnings.push(format!("没有文件匹配 {}", raw));
                    }
                    for path in matched {
                        push(path, &mut paths);
                    }
                }
                Err(e) => warnings.push(format!("无效的路径模式 {}: {}", raw, e)),
            }
        } else if doc.is_file() {
            push(doc.clone(), &mut paths);
        } else {
            warnings.push(format!("参考文档不存在: {}", doc.display()));
        }
    }

    if let Some(folder) = folder {
        if folder.is_dir() {
            for entry in WalkDir::new(folder)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .flatten()
            {
                if entry.file_type().is_file() {
                    push(entry.into_path(), &mut paths);
                }
            }
        } else {
            warnings.push(format!("参考文档目录不存在: {}", folder.display()));
        }
    }

    (paths, warnings)
}

/// UTF-8 解码失败时按 Latin-1 解码
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// 读取 `word/document.xml` 中每个段落的文本
pub fn docx_text(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).context("not a docx archive")?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .context("docx has no word/document.xml")?
        .read_to_string(&mut xml)?;

    let mut reader = Reader::from_str(&xml);
    reader.trim_text(false);
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:p" => current.clear(),
                b"w:t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                current.push_str(&t.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => bail!("invalid document.xml at {}: {}", reader.buffer_position(), e),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs.join("\n"))
}

/// 通过外部的pdftotext提取文本。加密或损坏的PDF返回错误
pub async fn pdf_text(path: &Path) -> Result<String> {
    let output = TokioCommand::new(PDF_TEXT_TOOL)
        .args(["-layout", "-enc", "UTF-8"])
        .arg(path)
        .arg("-")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| anyhow!("{} is not available: {}", PDF_TEXT_TOOL, e))?;

    if !output.status.success() {
        bail!(
            "{} failed: {}",
            PDF_TEXT_TOOL,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// 加载单个文档；不支持的扩展名返回 `Ok(None)`
pub async fn load_document(path: &Path) -> Result<Option<String>> {
    let Some(format) = DocumentFormat::from_path(path) else {
        return Ok(None);
    };
    let text = match format {
        DocumentFormat::Text => decode_text(&tokio::fs::read(path).await?),
        DocumentFormat::Docx => docx_text(&tokio::fs::read(path).await?)?,
        DocumentFormat::Pdf => pdf_text(path).await?,
    };
    Ok(Some(text.trim().to_string()))
}

/// 参考文档加载器
#[derive(Default)]
pub struct DocumentLoader;

impl DocumentLoader {
    pub async fn execute(&self, context: &GeneratorContext) -> Result<Vec<ReferenceDoc>> {
        let request = &context.request;
        if !request.has_reference_docs() {
            return Ok(vec![]);
        }

        context.log("📚 加载本地参考文档...").await;
        let (paths, warnings) =
            collect_paths(&request.reference_docs, request.reference_docs_folder.as_deref());
        for warning in warnings {
            context.warn(warning).await;
        }

        let mut docs = Vec::new();
        for path in paths {
            context.ensure_active()?;
            match load_document(&path).await {
                Ok(Some(text)) if text.is_empty() => {
                    context.warn(format!("文档内容为空，跳过 {}", path.display())).await;
                }
                Ok(Some(text)) => {
                    context
                        .log(format!("   📄 已加载 {} ({} 字符)", path.display(), text.chars().count()))
                        .await;
                    docs.push(ReferenceDoc { path, text });
                }
                Ok(None) => {
                    context.warn(format!("不支持的文件类型，跳过 {}", path.display())).await;
                }
                Err(e) => {
                    context.warn(format!("文档读取失败，跳过 {}: {}", path.display(), e)).await;
                }
            }
        }

        context.log(format!("✓ 共加载 {} 份参考文档", docs.len())).await;
        Ok(docs)
    }
}
