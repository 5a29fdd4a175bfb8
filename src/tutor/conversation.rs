use std::collections::VecDeque;

use async_openai::types::{ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage};

use crate::error::{Error, Result};

pub trait Tokens {
    fn tokens(&self) -> u64;
}
impl Tokens for str {
    fn tokens(&self) -> u64 {
        (self.len() + 2) as u64 / 4
    }
}
impl Tokens for String {
    fn tokens(&self) -> u64 {
        self.as_str().tokens()
    }
}

#[derive(Debug, Clone)]
struct Exchange {
    question: String,
    reply: String,
}

impl Exchange {
    fn tokens(&self) -> u64 {
        self.question.tokens() + self.reply.tokens()
    }
}

/// Running chat between one student and the tutor for one course.
#[derive(Debug)]
pub struct TutorConversation {
    instruction: String,
    history: VecDeque<Exchange>,
    token_count: u64,
    token_budget: u64,
}

impl TutorConversation {
    pub fn new(student_name: &str, course: &str, token_budget: u64) -> Self {
        let instruction = format!(
            "You are a language tutor for {student_name}, who is studying {course} on the LevelUp platform. \
             Be patient and encouraging. Explain grammar and vocabulary with short examples, \
             correct mistakes gently and keep every answer about {course}. \
             If asked about anything unrelated, steer the conversation back to the course."
        );
        Self {
            instruction,
            history: VecDeque::new(),
            token_count: 0,
            token_budget,
        }
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn token_count(&self) -> u64 {
        self.instruction.tokens() + self.token_count
    }

    /// Messages to send for a new student `question`. History is not changed
    /// until the reply is recorded.
    pub fn request(&self, question: &str) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::with_capacity(self.history.len() * 2 + 2);
        messages.push(ChatCompletionRequestMessage::System(
            self.instruction.clone().into(),
        ));
        for exchange in &self.history {
            messages.push(ChatCompletionRequestMessage::User(
                exchange.question.clone().into(),
            ));
            let reply = ChatCompletionRequestAssistantMessageArgs::default()
                .content(exchange.reply.clone())
                .build()
                .map_err(|e| Error::Ai(e.to_string()))?;
            messages.push(reply.into());
        }
        messages.push(ChatCompletionRequestMessage::User(question.to_string().into()));
        Ok(messages)
    }

    /// Append an answered exchange, dropping the oldest ones past the token budget.
    pub fn record(&mut self, question: &str, reply: &str) {
        let exchange = Exchange {
            question: question.to_string(),
            reply: reply.to_string(),
        };
        self.token_count += exchange.tokens();
        self.history.push_back(exchange);
        // the latest exchange is always kept
        while self.token_count() > self.token_budget && self.history.len() > 1 {
            if let Some(dropped) = self.history.pop_front() {
                self.token_count -= dropped.tokens();
            }
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.token_count = 0;
    }
}
