use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::tempdir;
use trackbit_core::goal::Effectiveness;
use trackbit_core::habit::NewHabit;
use trackbit_core::routine::NewRoutine;
use trackbit_core::store::RecordStore;
use trackbit_core::{GoalService, GoalThresholds, HabitService, JsonFileStore, RoutineService};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn open(path: &std::path::Path) -> Arc<HabitService> {
    let store: Arc<dyn RecordStore> = Arc::new(JsonFileStore::open(path).expect("open store"));
    Arc::new(
        HabitService::builder()
            .with_store(store)
            .for_user("alex")
            .build()
            .expect("build habit service"),
    )
}

#[test]
fn habits_routines_and_goals_survive_reopen() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("data").join("trackbit.json");

    let (water_id, vitamins_id, routine_id, goal_id) = {
        let habits = open(&path);
        let water = habits
            .add_habit(NewHabit::daily("Water").with_target(8.0, "glasses"))
            .expect("add water");
        let vitamins = habits
            .add_habit(NewHabit::daily("Vitamins"))
            .expect("add vitamins");

        for day in 1..=3 {
            habits
                .toggle_completion(&water.id, date(2024, 1, day))
                .expect("toggle water");
            habits
                .toggle_completion(&vitamins.id, date(2024, 1, day))
                .expect("toggle vitamins");
        }
        habits
            .toggle_completion(&water.id, date(2024, 1, 5))
            .expect("toggle water");

        let routines = RoutineService::builder(habits.clone())
            .build()
            .expect("routine service");
        let routine = routines
            .create_routine(
                NewRoutine::new("Morning", [water.id.clone(), vitamins.id.clone()])
                    .with_reminder(" 07:05 "),
            )
            .expect("create routine");
        routines
            .record_snapshot(&routine.id, date(2024, 1, 2))
            .expect("snapshot");

        let goals = GoalService::new(habits.clone(), GoalThresholds::default()).expect("goals");
        let goal = goals
            .create_goal(&water.id, 5, None, date(2024, 1, 1))
            .expect("create goal");

        (water.id, vitamins.id, routine.id, goal.id)
    };

    assert!(path.exists());
    let habits = open(&path);
    assert_eq!(habits.habits().len(), 2);
    // Water values default to the target when toggled on.
    let log = habits.log_for(&water_id, date(2024, 1, 1)).expect("log");
    assert!(log.completed);
    assert_eq!(log.value, Some(8.0));

    let streak = habits.streak(&water_id).expect("streak");
    assert_eq!(streak.current, 1);
    assert_eq!(streak.longest, 3);

    let routines = RoutineService::builder(habits.clone())
        .build()
        .expect("routine service");
    let routine = routines.routine(&routine_id).expect("routine");
    assert_eq!(routine.reminder_time.as_deref(), Some("07:05"));
    assert!(routines.progress(&routine_id, date(2024, 1, 2)).is_complete());
    assert_eq!(routines.progress(&routine_id, date(2024, 1, 5)).completed, 1);
    assert_eq!(routines.routine_streak(&routine_id).longest, 3);
    assert_eq!(routines.history(&routine_id).len(), 1);

    let goals = GoalService::new(habits.clone(), GoalThresholds::default()).expect("goals");
    let goal = goals.goal(&goal_id).expect("goal");
    let assessment = goals.assess(&goal, date(2024, 1, 6));
    // Window is 2024-01-01..=2024-01-05 and water was done on four of those days.
    assert_eq!(assessment.completed_days, 4);
    assert_eq!(assessment.total_days, 5);
    assert_eq!(assessment.effectiveness, Effectiveness::HighlyEffective);

    assert!(habits.delete_habit(&vitamins_id).expect("delete"));
    assert!(habits.logs_for(&vitamins_id).is_empty());
    let reopened = open(&path);
    assert!(reopened.habit(&vitamins_id).is_none());
    assert!(reopened.logs_for(&vitamins_id).is_empty());
    assert!(reopened.streak(&vitamins_id).is_none());
}

#[test]
fn users_do_not_see_each_other() {
    let temp = tempdir().expect("tempdir");
    let store: Arc<dyn RecordStore> =
        Arc::new(JsonFileStore::open(temp.path().join("shared.json")).expect("open store"));
    let alex = HabitService::builder()
        .with_store(store.clone())
        .for_user("alex")
        .build()
        .expect("alex");
    alex.add_habit(NewHabit::daily("Read")).expect("add");

    let blair = HabitService::builder()
        .with_store(store)
        .for_user("blair")
        .build()
        .expect("blair");
    assert!(blair.habits().is_empty());
}
