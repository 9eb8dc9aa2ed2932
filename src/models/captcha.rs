/// 图片验证码答案的固定长度
pub const IMAGE_ANSWER_LENGTH: usize = 6;

/// 一次求解成功的验证码
///
/// 只在单次尝试内存在，尝试结束即丢弃
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptchaChallenge {
    /// 图片验证码（登录、重发验证链接）
    Image {
        puzzle_id: String,
        image_body: String,
        answer: String,
        /// 求解服务的任务 ID，用于报告错误答案
        task_id: Option<u64>,
    },
    /// Turnstile 交互式验证（注册、验证邮箱）
    Turnstile { token: String },
}

impl CaptchaChallenge {
    pub fn kind(&self) -> &'static str {
        match self {
            CaptchaChallenge::Image { .. } => "image",
            CaptchaChallenge::Turnstile { .. } => "turnstile",
        }
    }

    /// 提交给平台的答案：图片验证码为识别结果，Turnstile 为 token
    pub fn answer(&self) -> &str {
        match self {
            CaptchaChallenge::Image { answer, .. } => answer,
            CaptchaChallenge::Turnstile { token } => token,
        }
    }

    pub fn puzzle_id(&self) -> Option<&str> {
        match self {
            CaptchaChallenge::Image { puzzle_id, .. } => Some(puzzle_id),
            CaptchaChallenge::Turnstile { .. } => None,
        }
    }
}

/// 求解服务返回的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveOutcome {
    /// 图片答案或 turnstile token；未解出时为服务返回的错误信息
    pub answer: String,
    pub solved: bool,
    pub task_id: Option<u64>,
}

impl SolveOutcome {
    pub fn solved(answer: impl Into<String>, task_id: Option<u64>) -> Self {
        Self {
            answer: answer.into(),
            solved: true,
            task_id,
        }
    }

    pub fn unsolved(message: impl Into<String>, task_id: Option<u64>) -> Self {
        Self {
            answer: message.into(),
            solved: false,
            task_id,
        }
    }

    /// 图片答案是否可用（已解出且恰好 6 个字符）
    pub fn is_valid_image_answer(&self) -> bool {
        self.solved && self.answer.chars().count() == IMAGE_ANSWER_LENGTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_answer_length_rule() {
        assert!(SolveOutcome::solved("ab12cd", Some(1)).is_valid_image_answer());
        assert!(!SolveOutcome::solved("ab12c", Some(1)).is_valid_image_answer());
        assert!(!SolveOutcome::solved("ab12cde", Some(1)).is_valid_image_answer());
        assert!(!SolveOutcome::unsolved("ab12cd", Some(1)).is_valid_image_answer());
    }

    #[test]
    fn test_challenge_accessors() {
        let image = CaptchaChallenge::Image {
            puzzle_id: "p-1".to_string(),
            image_body: "base64".to_string(),
            answer: "ab12cd".to_string(),
            task_id: Some(7),
        };
        let turnstile = CaptchaChallenge::Turnstile {
            token: "tok".to_string(),
        };

        assert_eq!(image.kind(), "image");
        assert_eq!(image.puzzle_id(), Some("p-1"));
        assert_eq!(turnstile.kind(), "turnstile");
        assert_eq!(turnstile.answer(), "tok");
        assert_eq!(turnstile.puzzle_id(), None);
    }
}
