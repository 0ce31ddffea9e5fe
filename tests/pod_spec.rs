mod common;

use std::time::Duration;

use coqpod::events::PodEvent;
use coqpod::interrupt::InterruptChannel;
use coqpod::kernel::{BootContext, Kernel, KernelError, LoopbackKernel};
use coqpod::pod::{Pod, PodError};
use coqpod::protocol::*;

use common::{bundle_package, fixture};

async fn booted(kernel: LoopbackKernel) -> (tempfile::TempDir, Pod, StateId) {
    let (temp, config) = fixture();
    let pod = Pod::new(config, Box::new(kernel)).expect("Failed to create pod");
    let root = pod.boot().await.expect("boot failed");
    (temp, pod, root)
}

fn added(answers: &[Answer]) -> StateId {
    answers
        .iter()
        .find_map(|answer| match answer {
            Answer::Added(id, _) => Some(*id),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no Added in {:?}", answers))
}

mod boot {
    use super::*;

    #[tokio::test]
    async fn installs_the_image_and_reports_ready() {
        let (temp, config) = fixture();
        let pod = Pod::new(config, Box::new(LoopbackKernel::new())).expect("Failed to create pod");
        let mut events = pod.subscribe();

        let root = pod.boot().await.expect("boot failed");

        assert!(pod.is_booted());
        assert_eq!(
            pod.vfs().get("/bin/kernel.img").expect("get failed"),
            Some(b"\0kernel image".to_vec())
        );
        let messages = events.drain_messages();
        assert_eq!(messages, vec![Message::Answer(Answer::Ready(root))]);
        assert_eq!(pod.document().root(), Some(root));
        drop(temp);
    }

    #[tokio::test]
    async fn fails_when_the_image_cannot_be_fetched() {
        let (_temp, mut config) = fixture();
        config.kernel_image = "coq/missing.img".to_string();
        let pod = Pod::new(config, Box::new(LoopbackKernel::new())).expect("Failed to create pod");

        let result = pod.boot().await;

        assert!(matches!(result, Err(PodError::Transport(_))));
        assert!(!pod.is_booted());
    }

    #[tokio::test]
    async fn installs_initial_packages() {
        let (temp, mut config) = fixture();
        bundle_package(&temp, "coq-base", &[("Coq/Init/Prelude.vo", b"")]);
        config.init_pkgs = vec!["+coq-base".to_string()];
        let pod = Pod::new(config, Box::new(LoopbackKernel::new())).expect("Failed to create pod");
        let mut events = pod.subscribe();

        let root = pod.boot().await.expect("boot failed");

        assert!(pod.vfs().exists("/lib/Coq/Init/Prelude.vo"));
        assert!(events
            .drain_messages()
            .contains(&Message::Notice(Notice::LoadedPkg(vec!["+coq-base".to_string()]))));
        let answers = pod
            .command(Command::Inspect {
                id: root,
                route: RouteId(1),
                query: SearchQuery::All,
            })
            .await
            .expect("inspect failed");
        assert_eq!(answers.len(), 1);
    }

    #[tokio::test]
    async fn commands_before_boot_are_refused() {
        let (_temp, config) = fixture();
        let pod = Pod::new(config, Box::new(LoopbackKernel::new())).expect("Failed to create pod");

        let result = pod.command(Command::Goals(StateId(1))).await;

        assert!(matches!(result, Err(PodError::NotBooted)));
    }
}

mod ordering {
    use super::*;

    #[tokio::test]
    async fn answers_follow_the_commands_that_caused_them() {
        let (_temp, pod, root) = booted(LoopbackKernel::new()).await;
        let mut events = pod.subscribe();

        let lemma = added(&pod.command(Command::add("Lemma t : True.")).await.unwrap());
        let proof = added(&pod.command(Command::add("Proof.")).await.unwrap());
        pod.command(Command::Exec(proof)).await.unwrap();
        pod.command(Command::Goals(proof)).await.unwrap();

        let answers: Vec<Answer> = events
            .drain_messages()
            .into_iter()
            .filter_map(|m| m.as_answer().cloned())
            .collect();
        let tags: Vec<&str> = answers.iter().map(Answer::tag).collect();
        assert_eq!(tags, vec!["Added", "Added", "Feedback", "Feedback", "GoalInfo"]);

        let processed: Vec<StateId> = answers
            .iter()
            .filter_map(|a| match a {
                Answer::Feedback(fb) => Some(fb.span_id),
                _ => None,
            })
            .collect();
        assert_eq!(processed, vec![lemma, proof]);
        assert!(matches!(&answers[4], Answer::GoalInfo(id, Some(_)) if *id == proof));
        assert_eq!(pod.document().path(proof).unwrap(), vec![root, lemma, proof]);
    }

    #[tokio::test]
    async fn concurrent_submissions_are_served_in_order() {
        let (_temp, pod, root) = booted(LoopbackKernel::new()).await;

        let (a, b, c) = futures::join!(
            pod.command(Command::add("a.")),
            pod.command(Command::add("b.")),
            pod.command(Command::add("c.")),
        );
        let (a, b, c) = (added(&a.unwrap()), added(&b.unwrap()), added(&c.unwrap()));

        assert!(a < b && b < c);
        assert_eq!(pod.document().path(c).unwrap(), vec![root, a, b, c]);
    }
}

mod editing {
    use super::*;

    #[tokio::test]
    async fn cancel_undoes_an_add() {
        let (_temp, pod, _root) = booted(LoopbackKernel::new()).await;
        let parent = added(&pod.command(Command::add("Definition x := 1.")).await.unwrap());
        let live_before = pod.document().live_ids();

        let child = added(
            &pod.command(Command::Add {
                edit_at: None,
                parent: Some(parent),
                text: "Definition y := x.".to_string(),
                verbose: false,
            })
            .await
            .unwrap(),
        );
        let answers = pod.command(Command::Cancel(child)).await.unwrap();

        assert_eq!(answers, vec![Answer::BackTo(parent)]);
        assert_eq!(pod.document().live_ids(), live_before);
    }

    #[tokio::test]
    async fn edit_at_replaces_the_rest_of_the_document() {
        let (_temp, pod, root) = booted(LoopbackKernel::new()).await;
        let first = added(&pod.command(Command::add("a.")).await.unwrap());
        let second = added(&pod.command(Command::add("b.")).await.unwrap());

        let replacement = added(
            &pod.command(Command::Add {
                edit_at: Some(second),
                parent: None,
                text: "b'.".to_string(),
                verbose: true,
            })
            .await
            .unwrap(),
        );

        let doc = pod.document();
        assert!(!doc.is_live(second));
        assert_eq!(doc.live_ids(), vec![root, first, replacement]);
        assert_eq!(doc.text_of(replacement), Some("b'."));
    }

    #[tokio::test]
    async fn ambiguous_adds_never_reach_the_kernel() {
        let (_temp, pod, root) = booted(LoopbackKernel::new()).await;
        let mut events = pod.subscribe();

        let result = pod
            .command(Command::Add {
                edit_at: Some(root),
                parent: Some(root),
                text: "x.".to_string(),
                verbose: false,
            })
            .await;

        assert!(matches!(result, Err(PodError::Codec(CodecError::Ambiguous))));
        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn failed_execution_rolls_back_to_the_last_good_state() {
        let checker = |text: &str| {
            if text.starts_with("fail") {
                Err("Cannot check sentence.".to_string())
            } else {
                Ok(())
            }
        };
        let (_temp, pod, _root) = booted(LoopbackKernel::new().with_checker(checker)).await;
        let good = added(&pod.command(Command::add("Definition ok := 1.")).await.unwrap());
        let bad = added(&pod.command(Command::add("fail.")).await.unwrap());

        let answers = pod.command(Command::Exec(bad)).await.unwrap();

        match answers.last() {
            Some(Answer::CoqExn {
                loc: Some(_),
                rollback,
                msg,
            }) => {
                assert_eq!(*rollback, Some((good, bad)));
                assert_eq!(msg, "Cannot check sentence.");
            }
            other => panic!("expected CoqExn, got {:?}", other),
        }
        let goals = pod.command(Command::Goals(good)).await.unwrap();
        assert_eq!(goals, vec![Answer::GoalInfo(good, None)]);
        let doc = pod.document();
        assert!(!doc.is_live(bad));
        assert_eq!(doc.tip(), Some(good));
    }
}

mod interrupts {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn a_long_execution_stops_once_interrupted() {
        let (_temp, pod, root) = booted(LoopbackKernel::new().with_poll_cost(usize::MAX)).await;
        let id = added(&pod.command(Command::add("Lemma slow : True.")).await.unwrap());

        let interrupt = pod.interrupt();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            interrupt.set();
        });

        let answers = tokio::time::timeout(Duration::from_secs(10), pod.command(Command::Exec(id)))
            .await
            .expect("interrupt was never observed")
            .unwrap();

        assert_eq!(
            answers,
            vec![Answer::CoqExn {
                loc: None,
                rollback: Some((root, id)),
                msg: "User interrupt.".to_string(),
            }]
        );
        assert!(!pod.interrupt().is_set());
    }

    #[tokio::test]
    async fn a_stale_interrupt_is_cleared_after_the_command() {
        let (_temp, pod, _root) = booted(LoopbackKernel::new()).await;
        pod.interrupt().set();

        pod.command(Command::add("a.")).await.unwrap();

        assert!(!pod.interrupt().is_set());
    }

    #[tokio::test]
    async fn setup_attaches_a_marker_file() {
        let (_temp, pod, _root) = booted(LoopbackKernel::new()).await;
        pod.send(HostMessage::InterruptSetup(InterruptConfig {
            marker: Some("/.interrupt".to_string()),
        }))
        .await
        .unwrap();

        pod.interrupt().set();
        assert!(pod.vfs().exists("/.interrupt"));
        pod.interrupt().clear();
        assert!(!pod.vfs().exists("/.interrupt"));
    }
}

mod administration {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips_through_the_sandbox() {
        let (_temp, pod, _root) = booted(LoopbackKernel::new()).await;
        let mut events = pod.subscribe();

        pod.send(HostMessage::Put("/tmp/a.v".into(), Content::Text("Goal True.".into())))
            .await
            .unwrap();
        pod.send(HostMessage::Get("/tmp/a.v".into())).await.unwrap();
        pod.send(HostMessage::Get("/tmp/missing.v".into())).await.unwrap();

        assert_eq!(
            events.drain_messages(),
            vec![
                Message::Notice(Notice::Got("/tmp/a.v".into(), Some(b"Goal True.".to_vec()))),
                Message::Notice(Notice::Got("/tmp/missing.v".into(), None)),
            ]
        );
    }

    #[tokio::test]
    async fn administrative_messages_work_before_boot() {
        let (_temp, config) = fixture();
        let pod = Pod::new(config, Box::new(LoopbackKernel::new())).expect("Failed to create pod");

        pod.send(HostMessage::Put("notes.txt".into(), Content::Bytes(vec![1, 2, 3])))
            .await
            .unwrap();

        assert_eq!(
            pod.vfs().get("/lib/notes.txt").unwrap(),
            Some(vec![1, 2, 3])
        );
    }
}

mod kernel_output {
    use super::*;

    /// Emits one well-formed answer and one line of noise per command.
    struct NoisyKernel;

    impl Kernel for NoisyKernel {
        fn boot(&mut self, _ctx: &BootContext) -> Result<(), KernelError> {
            Ok(())
        }

        fn post(
            &mut self,
            command: &str,
            _interrupt: &InterruptChannel,
            emit: &mut dyn FnMut(String),
        ) -> Result<(), KernelError> {
            if command == r#"["Init"]"# {
                emit(Answer::Ready(StateId(1)).encode());
            } else {
                emit("Stack overflow".to_string());
                emit(Answer::BackTo(StateId(1)).encode());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn undecodable_lines_become_json_exceptions() {
        let (_temp, config) = fixture();
        let pod = Pod::new(config, Box::new(NoisyKernel)).expect("Failed to create pod");
        pod.boot().await.expect("boot failed");
        let mut events = pod.subscribe();

        let answers = pod.command(Command::Goals(StateId(1))).await.unwrap();

        assert_eq!(
            answers,
            vec![
                Answer::JsonExn("Stack overflow".to_string()),
                Answer::BackTo(StateId(1)),
            ]
        );
        let published: Vec<_> = events
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                PodEvent::Message(Message::Answer(answer)) => Some(answer),
                _ => None,
            })
            .collect();
        assert_eq!(published, answers);
    }
}

#[cfg(unix)]
mod process_kernel {
    use super::*;
    use coqpod::kernel::ProcessKernel;

    const SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  case "$line" in
    '["Init"]') echo '["Ready",1]' ;;
    *)
      echo '["Feedback",{"span_id":1,"route":0,"level":"Info","contents":["Processed"]}]'
      echo 'segfault'
      ;;
  esac
  echo
done
"#;

    #[tokio::test]
    async fn talks_json_lines_to_a_child_process() {
        let (temp, config) = fixture();
        std::fs::write(temp.path().join("bin/coq/kernel.img"), SCRIPT)
            .expect("Failed to write script");
        let pod = Pod::new(config, Box::new(ProcessKernel::new(Vec::new())))
            .expect("Failed to create pod");

        let root = pod.boot().await.expect("boot failed");
        assert_eq!(root, StateId(1));

        let answers = pod.command(Command::Exec(root)).await.unwrap();
        assert_eq!(answers.len(), 2);
        assert!(matches!(
            &answers[0],
            Answer::Feedback(fb) if fb.span_id == root && fb.level == Level::Info
        ));
        assert_eq!(answers[1], Answer::JsonExn("segfault".to_string()));
    }
}
