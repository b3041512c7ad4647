//! Terminal confirmation dialog, modelled without any IO.
//!
//! `Prompting → Reading → Committed(decision)`. The dialog is fed raw bytes as they
//! arrive on the channel and answers with the bytes to echo back plus, once a line
//! is committed, the decision. Nothing here touches the registry, so dropping a
//! dialog before it commits leaves the code untouched.

const CTRL_C: u8 = 0x03;
const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;
const ERASE: &[u8] = b"\x08 \x08";

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
    /// Ctrl-C. Resolves like a denial but closes without the grace delay.
    Interrupt,
}

impl Decision {
    #[must_use]
    pub const fn is_approval(self) -> bool {
        matches!(self, Self::Approve)
    }

    #[must_use]
    pub const fn exit_status(self) -> u32 {
        match self {
            Self::Approve => 0,
            Self::Deny | Self::Interrupt => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prompting,
    Reading,
    Committed(Decision),
}

/// Result of feeding one chunk of input.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Step {
    pub echo: Vec<u8>,
    pub decision: Option<Decision>,
}

#[derive(Debug)]
pub struct Dialog {
    phase: Phase,
    line: String,
}

impl Default for Dialog {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialog {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: Phase::Prompting,
            line: String::new(),
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Render the prompt and start reading.
    pub fn prompt(&mut self, purpose: &str) -> String {
        if self.phase == Phase::Prompting {
            self.phase = Phase::Reading;
        }
        render_prompt(purpose)
    }

    /// Consume input bytes. Bytes after the commit point are ignored.
    pub fn feed(&mut self, input: &[u8]) -> Step {
        let mut step = Step::default();

        for &byte in input {
            match self.phase {
                Phase::Committed(_) => break,
                Phase::Prompting => self.phase = Phase::Reading,
                Phase::Reading => {}
            }

            match byte {
                b'\r' | b'\n' => {
                    let decision = decide(&self.line);
                    step.decision = Some(self.commit(decision));
                }
                CTRL_C => step.decision = Some(self.commit(Decision::Interrupt)),
                BACKSPACE | DELETE => {
                    if self.line.pop().is_some() {
                        step.echo.extend_from_slice(ERASE);
                    }
                }
                b' '..=b'~' => {
                    self.line.push(char::from(byte));
                    step.echo.push(byte);
                }
                _ => {}
            }
        }

        step
    }

    fn commit(&mut self, decision: Decision) -> Decision {
        self.line.clear();
        self.phase = Phase::Committed(decision);
        decision
    }
}

fn decide(line: &str) -> Decision {
    let answer = line.trim().to_ascii_lowercase();
    if answer == "y" || answer == "yes" {
        Decision::Approve
    } else {
        Decision::Deny
    }
}

#[must_use]
pub fn render_prompt(purpose: &str) -> String {
    let mut out = String::new();
    out.push_str("\r\n");
    out.push_str("┌────────────────────────────────────────────────────┐\r\n");
    out.push_str("│           SSH 密钥认证服务                          │\r\n");
    out.push_str("│      SSH Key Authentication Service                │\r\n");
    out.push_str("└────────────────────────────────────────────────────┘\r\n");
    out.push_str("\r\n");
    out.push_str("✓ SSH 公钥认证成功！\r\n");
    out.push_str("  SSH public key authenticated successfully!\r\n");
    out.push_str("\r\n");
    out.push_str(RULE);
    out.push_str("\r\n");
    out.push_str(&format!("   鉴权用途 | Purpose: {purpose}\r\n"));
    out.push_str(RULE);
    out.push_str("\r\n\r\n");
    out.push_str("    安全提示 | Security Notice:\r\n");
    out.push_str("   此操作将授权使用您的 SSH 公钥进行身份验证。\r\n");
    out.push_str("   This will authorize the use of your SSH public key.\r\n");
    out.push_str("\r\n");
    out.push_str("   是否同意此次鉴权请求？\r\n");
    out.push_str("   Do you approve this authentication request?\r\n");
    out.push_str("\r\n");
    out.push_str("   输入 y 同意 | Type \"y\" to approve\r\n");
    out.push_str("   输入其他拒绝 | Type anything else to deny\r\n");
    out.push_str("\r\n");
    out.push_str("您的选择 | Your choice: ");
    out
}

/// Text written once the decision has been recorded.
#[must_use]
pub fn outcome_message(decision: Decision) -> String {
    match decision {
        Decision::Approve => format!(
            "\r\n\r\n{RULE}\r\n   已同意 | Approved\r\n{RULE}\r\n\r\n\
             ✓ 鉴权成功！您的 SSH 公钥已被记录。\r\n  Authentication successful!\r\n  \
             Your SSH public key has been recorded.\r\n\r\n\
             您现在可以关闭此连接。\r\nYou can now close this connection.\r\n\r\n"
        ),
        Decision::Deny => format!(
            "\r\n\r\n{RULE}\r\n   已拒绝 | Denied\r\n{RULE}\r\n\r\n\
             ✗ 鉴权已取消。\r\n  Authentication cancelled.\r\n\r\n"
        ),
        Decision::Interrupt => "\r\n\r\n已取消 | Cancelled\r\n".to_string(),
    }
}

/// Text written when the decision could not be recorded (code expired or taken over).
#[must_use]
pub fn confirmation_failed_message() -> &'static str {
    "\r\n\r\n✗ 验证码已失效，鉴权未完成。\r\n  The verification code is no longer valid. Nothing was recorded.\r\n\r\n"
}

#[must_use]
pub fn missing_code_message() -> &'static str {
    "\r\n错误：无法找到对应的验证码\r\nError: Cannot find corresponding verification code\r\n"
}

#[must_use]
pub fn exec_acknowledgement() -> &'static str {
    "认证成功！您的SSH公钥已被记录。\nAuthentication successful! Your SSH public key has been recorded.\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &[u8]) -> (Dialog, Step) {
        let mut dialog = Dialog::new();
        let _ = dialog.prompt("login");
        let step = dialog.feed(input);
        (dialog, step)
    }

    #[test]
    fn prompt_moves_to_reading_and_shows_purpose() {
        let mut dialog = Dialog::new();
        assert_eq!(dialog.phase(), Phase::Prompting);

        let text = dialog.prompt("登录到系统 - 用户: alice");
        assert_eq!(dialog.phase(), Phase::Reading);
        assert!(text.contains("Purpose: 登录到系统 - 用户: alice"));
        assert!(text.ends_with("Your choice: "));
    }

    #[test]
    fn y_and_yes_approve_case_insensitively() {
        for input in [&b"y\r"[..], b"Y\r", b"yes\n", b" YeS \r"] {
            let (dialog, step) = run(input);
            assert_eq!(step.decision, Some(Decision::Approve), "input {input:?}");
            assert_eq!(dialog.phase(), Phase::Committed(Decision::Approve));
        }
    }

    #[test]
    fn anything_else_denies() {
        for input in [&b"n\r"[..], b"\r", b"yess\r", b"nope\n"] {
            let (_, step) = run(input);
            assert_eq!(step.decision, Some(Decision::Deny), "input {input:?}");
        }
    }

    #[test]
    fn input_arriving_byte_by_byte_is_buffered() {
        let mut dialog = Dialog::new();
        let _ = dialog.prompt("login");

        let first = dialog.feed(b"y");
        assert_eq!(first.echo, b"y");
        assert_eq!(first.decision, None);
        assert_eq!(dialog.phase(), Phase::Reading);

        let second = dialog.feed(b"\r");
        assert!(second.echo.is_empty());
        assert_eq!(second.decision, Some(Decision::Approve));
    }

    #[test]
    fn backspace_erases_and_echoes() {
        let (_, step) = run(b"n\x7fy\r");
        assert_eq!(step.decision, Some(Decision::Approve));
        assert_eq!(step.echo, b"n\x08 \x08y");

        // Backspace on an empty line echoes nothing.
        let (_, step) = run(b"\x08\x08y\r");
        assert_eq!(step.echo, b"y");
    }

    #[test]
    fn ctrl_c_interrupts_without_a_line() {
        let (dialog, step) = run(b"ye\x03");
        assert_eq!(step.decision, Some(Decision::Interrupt));
        assert_eq!(dialog.phase(), Phase::Committed(Decision::Interrupt));
        assert_eq!(Decision::Interrupt.exit_status(), 1);
        assert!(!Decision::Interrupt.is_approval());
    }

    #[test]
    fn bytes_after_commit_are_ignored() {
        let (mut dialog, step) = run(b"n\ry\r");
        assert_eq!(step.decision, Some(Decision::Deny));
        assert_eq!(dialog.feed(b"y\r"), Step::default());
        assert_eq!(dialog.phase(), Phase::Committed(Decision::Deny));
    }

    #[test]
    fn control_and_non_ascii_bytes_are_dropped() {
        let (_, step) = run(b"\x1b[Ay\xe4\r");
        // ESC is dropped, "[A" is printable and stays in the line.
        assert_eq!(step.echo, b"[Ay");
        assert_eq!(step.decision, Some(Decision::Deny));
    }

    #[test]
    fn outcome_messages_are_bilingual() {
        assert!(outcome_message(Decision::Approve).contains("Approved"));
        assert!(outcome_message(Decision::Approve).contains("已同意"));
        assert!(outcome_message(Decision::Deny).contains("Authentication cancelled."));
        assert!(outcome_message(Decision::Interrupt).contains("已取消 | Cancelled"));
        assert_eq!(Decision::Approve.exit_status(), 0);
    }
}
